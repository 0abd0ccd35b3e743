//! Flattening of `extends` chains into effective profiles.

use std::collections::{HashMap, HashSet};

use crate::profile::Profile;

/// Resolves `name` into its effective profile.
///
/// The returned profile never has `extends` set. Cycles in the chain stop
/// the walk at the first revisited profile instead of failing.
pub fn resolve(profiles: &HashMap<String, Profile>, name: &str) -> Option<Profile> {
    let profile = profiles.get(name)?;
    let mut visited = HashSet::new();
    let mut effective = resolve_chain(profiles, name, profile, &mut visited);
    effective.extends.clear();
    Some(effective)
}

fn resolve_chain(
    profiles: &HashMap<String, Profile>,
    key: &str,
    profile: &Profile,
    visited: &mut HashSet<String>,
) -> Profile {
    if profile.extends.is_empty() {
        return profile.clone();
    }

    if !visited.insert(key.to_string()) {
        tracing::debug!(
            profile = key,
            parent = %profile.extends,
            "circular profile inheritance, stopping here"
        );
        return profile.clone();
    }

    let Some(parent) = profiles.get(&profile.extends) else {
        tracing::warn!(
            profile = key,
            parent = %profile.extends,
            "parent profile not found"
        );
        return profile.clone();
    };

    let parent = resolve_chain(profiles, &profile.extends, parent, visited);
    merge(profile, parent)
}

/// Child values override parent values when set.
fn merge(child: &Profile, parent: Profile) -> Profile {
    Profile {
        name: child.name.clone(),
        protocol: child.protocol.clone().or(parent.protocol),
        host: text(&child.host, parent.host),
        port: if child.port != 0 { child.port } else { parent.port },
        username: text(&child.username, parent.username),
        identity_file: text(&child.identity_file, parent.identity_file),
        use_agent: child.use_agent,
        extra_args: list(&child.extra_args, parent.extra_args),
        proxy_jump: text(&child.proxy_jump, parent.proxy_jump),

        local_forwards: list(&child.local_forwards, parent.local_forwards),
        remote_forwards: list(&child.remote_forwards, parent.remote_forwards),
        dynamic_forwards: list(&child.dynamic_forwards, parent.dynamic_forwards),

        remote_command: text(&child.remote_command, parent.remote_command),
        remote_dir: text(&child.remote_dir, parent.remote_dir),
        set_env: list(&child.set_env, parent.set_env),

        aws_region: text(&child.aws_region, parent.aws_region),
        aws_profile: text(&child.aws_profile, parent.aws_profile),
        instance_id: text(&child.instance_id, parent.instance_id),

        gcp_project: text(&child.gcp_project, parent.gcp_project),
        gcp_zone: text(&child.gcp_zone, parent.gcp_zone),
        gcp_use_tunnel: child.gcp_use_tunnel,

        mosh_server: text(&child.mosh_server, parent.mosh_server),

        group: text(&child.group, parent.group),
        description: text(&child.description, parent.description),
        tags: list(&child.tags, parent.tags),
        favorite: child.favorite,
        last_used: child.last_used,
        use_count: child.use_count,

        extends: String::new(),
    }
}

fn text(child: &str, parent: String) -> String {
    if child.is_empty() {
        parent
    } else {
        child.to_string()
    }
}

// Lists are replaced as a whole, never concatenated.
fn list(child: &[String], parent: Vec<String>) -> Vec<String> {
    if child.is_empty() {
        parent
    } else {
        child.to_vec()
    }
}
