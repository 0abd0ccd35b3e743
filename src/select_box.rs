use std::io::{self, Write};

use crate::input::InputBuffer;
use crate::profile::Profile;
use crate::terminal::Terminal;

use ratatui::prelude::*;
use ratatui::widgets::*;

use crossterm::event::{self, Event, KeyEventKind};
use unicode_width::UnicodeWidthStr;

use fuzzy_matcher::{skim::SkimMatcherV2, FuzzyMatcher};

const INFO_TEXT_NORMAL_MODE: &str =
    "(Esc) quit | (↑) move up | (↓) move down | (Enter) connect | (/) search";
const INFO_TEXT_SEARCH_MODE: &str =
    "(Esc) quit search | (↑) move up | (↓) move down | (Enter) connect";
const SEARCH_SYMBOL: &str = "🔍 ";
const FAVORITE_MARK: &str = "★ ";

enum Mode {
    Normal,
    Search,
}

/// One row of the picker: profile name, `user@host` and group.
#[derive(Clone, Debug, PartialEq)]
pub struct PickerEntry {
    pub name: String,
    pub target: String,
    pub group: String,
    pub favorite: bool,
}

impl PickerEntry {
    /// Profiles without a username show the local login name, which is
    /// what the delegated tool will use.
    pub fn from_profile(profile: &Profile) -> Self {
        let user = if profile.username.is_empty() {
            whoami::username()
        } else {
            profile.username.clone()
        };
        Self {
            name: profile.name.clone(),
            target: format!("{}@{}", user, profile.host),
            group: profile.group.clone(),
            favorite: profile.favorite,
        }
    }

    fn columns(&self) -> [&str; 3] {
        [&self.name, &self.target, &self.group]
    }
}

pub struct SelectBox {
    pub data: Vec<PickerEntry>,
    state: TableState,
    longest_item_lens: [u16; 3], // order is (name, target, group)
    visible: Vec<(usize, [Vec<usize>; 3])>,
    input_buffer: InputBuffer,
    mode: Mode,
}

impl SelectBox {
    pub fn new(data: Vec<PickerEntry>) -> Self {
        let width = |column: usize| {
            data.iter()
                .map(|d| UnicodeWidthStr::width(d.columns()[column]))
                .max()
                .unwrap_or(0) as u16
        };
        let longest_item_lens = [width(0) + FAVORITE_MARK.len() as u16, width(1), width(2)];
        let visible = (0..data.len()).map(|i| (i, Default::default())).collect();
        Self {
            longest_item_lens,
            visible,
            state: TableState::default().with_selected(0),
            input_buffer: InputBuffer::new(SEARCH_SYMBOL.to_string()),
            mode: Mode::Normal,
            data,
        }
    }

    /// Runs the picker until the user connects (`Some(name)`) or quits.
    pub fn select(&mut self, terminal: &mut Terminal<impl Write>) -> io::Result<Option<String>> {
        loop {
            self.draw(terminal)?;
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }

            use event::KeyCode::*;
            match key.code {
                Down => self.down(),
                Up => self.up(),
                Enter => {
                    // If no profile is selected, do nothing
                    if let Some(entry) = self.selected() {
                        let name = entry.name.clone();
                        terminal.clear()?;
                        return Ok(Some(name));
                    }
                }
                _ => match self.mode {
                    Mode::Normal => match key.code {
                        Esc | Char('q') => {
                            terminal.clear()?;
                            return Ok(None);
                        }
                        Char('/') => {
                            self.mode = Mode::Search;
                            self.input_buffer.reset();
                        }
                        _ => {}
                    },
                    Mode::Search => {
                        if key.code == Esc {
                            self.input_buffer.reset();
                            self.mode = Mode::Normal;
                        } else {
                            self.input_buffer.handle_event(Event::Key(key));
                        }
                        self.refilter();
                    }
                },
            }
        }
    }

    fn selected(&self) -> Option<&PickerEntry> {
        let (index, _) = self.visible.get(self.state.selected()?)?;
        self.data.get(*index)
    }

    pub fn draw(&mut self, terminal: &mut Terminal<impl Write>) -> io::Result<()> {
        terminal.draw(|frame| {
            self.ui(frame);
        })?;
        Ok(())
    }

    fn ui(&mut self, f: &mut Frame) {
        let header = Row::new(vec![
            Cell::from("Profile").style(Style::default().add_modifier(Modifier::UNDERLINED)),
            Cell::from("Target").style(Style::default().add_modifier(Modifier::UNDERLINED)),
            Cell::from("Group").style(Style::default().add_modifier(Modifier::UNDERLINED)),
        ])
        .style(Style::default().add_modifier(Modifier::BOLD));

        let rows: Vec<_> = self
            .visible
            .iter()
            .map(|(index, indices)| {
                let entry = &self.data[*index];
                let mark = if entry.favorite { FAVORITE_MARK } else { "" };
                let mut name = vec![Span::raw(mark)];
                name.extend(Self::get_highlight_spans(&entry.name, &indices[0]));
                Row::new([
                    Text::from(Line::from(name)),
                    Text::from(Line::from(Self::get_highlight_spans(&entry.target, &indices[1]))),
                    Text::from(Line::from(Self::get_highlight_spans(&entry.group, &indices[2]))),
                ])
            })
            .collect();

        let table = Table::new(
            rows,
            [
                Constraint::Length(self.longest_item_lens[0] + 1),
                Constraint::Min(self.longest_item_lens[1] + 1),
                Constraint::Min(self.longest_item_lens[2]),
            ],
        )
        .header(header)
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_spacing(HighlightSpacing::Always);

        let info = match self.mode {
            Mode::Normal => Paragraph::new(Line::from(INFO_TEXT_NORMAL_MODE)).centered(),
            Mode::Search => Paragraph::new(Line::from(INFO_TEXT_SEARCH_MODE)).centered(),
        };

        if matches!(self.mode, Mode::Search) {
            let recs = Layout::vertical([
                Constraint::Min(3),
                Constraint::Length(3),
                Constraint::Length(1),
            ])
            .split(f.size());

            let input = Paragraph::new(
                Text::from(self.input_buffer.line()).style(Style::default().fg(Color::Cyan)),
            )
            .block(Block::default().borders(Borders::ALL));

            StatefulWidget::render(table, recs[0], f.buffer_mut(), &mut self.state);
            input.render(recs[1], f.buffer_mut());
            info.render(recs[2], f.buffer_mut());

            f.set_cursor(
                recs[1].x + 1 + self.input_buffer.visual_cursor() as u16,
                recs[1].y + 1,
            );
        } else {
            let recs =
                Layout::vertical([Constraint::Min(3), Constraint::Length(1)]).split(f.size());

            StatefulWidget::render(table, recs[0], f.buffer_mut(), &mut self.state);
            info.render(recs[1], f.buffer_mut());
        }
    }

    fn up(&mut self) {
        if self.visible.is_empty() {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => self.visible.len() - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i))
    }

    fn down(&mut self) {
        if self.visible.is_empty() {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < self.visible.len() => i + 1,
            _ => 0,
        };
        self.state.select(Some(i))
    }

    fn refilter(&mut self) {
        self.visible = self.fuzzy_match(self.input_buffer.query());
        let selected = if self.visible.is_empty() { None } else { Some(0) };
        self.state.select(selected);
    }

    // Indices into `data` of matching entries, with matched character
    // positions per column. An empty pattern matches everything.
    fn fuzzy_match(&self, pattern: &str) -> Vec<(usize, [Vec<usize>; 3])> {
        if pattern.is_empty() {
            return (0..self.data.len()).map(|i| (i, Default::default())).collect();
        }
        let matcher = SkimMatcherV2::default();
        self.data
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let indices = entry.columns().map(|column| {
                    matcher
                        .fuzzy_indices(column, pattern)
                        .map(|(_, indices)| indices)
                        .unwrap_or_default()
                });
                if indices.iter().all(Vec::is_empty) {
                    None
                } else {
                    Some((i, indices))
                }
            })
            .collect()
    }

    fn get_highlight_spans<'b>(input: &str, indices: &[usize]) -> Vec<Span<'b>> {
        let mut spans = Vec::new();
        let mut current_segment = String::new();
        let mut index_set: Vec<usize> = indices.to_vec();
        index_set.sort_unstable();
        index_set.dedup();

        let highlight_style = Style::default()
            .fg(Color::Rgb(250, 0, 0))
            .bg(Color::Rgb(0xFF, 0xFC, 0x67))
            .add_modifier(Modifier::BOLD);
        for (i, c) in input.chars().enumerate() {
            if index_set.binary_search(&i).is_ok() {
                if !current_segment.is_empty() {
                    spans.push(Span::raw(current_segment.clone()));
                    current_segment.clear();
                }
                spans.push(Span::styled(c.to_string(), highlight_style));
            } else {
                current_segment.push(c);
            }
        }

        if !current_segment.is_empty() {
            spans.push(Span::raw(current_segment));
        }

        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, target: &str, group: &str) -> PickerEntry {
        PickerEntry {
            name: name.into(),
            target: target.into(),
            group: group.into(),
            favorite: false,
        }
    }

    fn picker() -> SelectBox {
        SelectBox::new(vec![
            entry("web", "deploy@web.example.com", "prod"),
            entry("db", "ops@10.0.0.5", "prod"),
            entry("router", "admin@192.168.1.1", "home"),
        ])
    }

    #[test]
    fn empty_query_shows_everything() {
        let p = picker();
        let visible: Vec<_> = p.fuzzy_match("").iter().map(|(i, _)| *i).collect();
        assert_eq!(visible, [0, 1, 2]);
    }

    #[test]
    fn query_matches_any_column() {
        let p = picker();
        let by_group: Vec<_> = p.fuzzy_match("home").iter().map(|(i, _)| *i).collect();
        assert_eq!(by_group, [2]);
        let by_host: Vec<_> = p.fuzzy_match("10.0.0").iter().map(|(i, _)| *i).collect();
        assert_eq!(by_host, [1]);
    }

    #[test]
    fn selection_follows_the_filtered_rows() {
        let mut p = picker();
        p.visible = p.fuzzy_match("router");
        p.state.select(Some(0));
        assert_eq!(p.selected().unwrap().name, "router");
    }

    #[test]
    fn navigation_wraps_and_tolerates_empty() {
        let mut p = picker();
        p.up();
        assert_eq!(p.state.selected(), Some(2));
        p.down();
        assert_eq!(p.state.selected(), Some(0));

        let mut empty = SelectBox::new(Vec::new());
        empty.up();
        empty.down();
        assert!(empty.selected().is_none());
    }

    #[test]
    fn highlight_splits_matched_characters() {
        let spans = SelectBox::get_highlight_spans("web", &[0, 2]);
        let text: Vec<_> = spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, ["w", "e", "b"]);
        assert_eq!(spans.len(), 3);
    }
}
