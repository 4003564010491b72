use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::capability::Envelope;

/// A project as exposed to the assistant. Only public fields exist here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
}

/// A user profile as exposed to the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub full_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub interest: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    projects: Vec<ProjectRecord>,
    #[serde(default)]
    users: Vec<UserRecord>,
}

/// Read-only catalog of projects and users, loaded from a JSON snapshot.
#[derive(Debug, Default)]
pub struct Catalog {
    snapshot: Snapshot,
}

impl Catalog {
    /// Load the snapshot at `path`. A missing file is an empty catalog.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("No catalog snapshot at {}, starting empty", path.display());
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse catalog {}", path.display()))?;
        tracing::info!(
            "Catalog loaded: {} projects, {} users",
            snapshot.projects.len(),
            snapshot.users.len()
        );
        Ok(Self { snapshot })
    }

    pub fn from_records(projects: Vec<ProjectRecord>, users: Vec<UserRecord>) -> Self {
        Self {
            snapshot: Snapshot { projects, users },
        }
    }

    /// Projects whose title contains `title` and/or with a required skill
    /// containing `skill` (both case-insensitive, AND when both given).
    pub fn find_projects(&self, skill: Option<&str>, title: Option<&str>) -> Envelope {
        let skill = non_blank(skill);
        let title = non_blank(title);
        if skill.is_none() && title.is_none() {
            return Envelope::failure("Please specify a skill or title to search for.");
        }

        let data: Vec<Value> = self
            .snapshot
            .projects
            .iter()
            .filter(|p| title.map_or(true, |t| contains_ci(&p.title, t)))
            .filter(|p| skill.map_or(true, |s| p.required_skills.iter().any(|r| contains_ci(r, s))))
            .filter_map(|p| serde_json::to_value(p).ok())
            .collect();

        if data.is_empty() {
            Envelope::found("No projects found matching your criteria.", data)
        } else {
            Envelope::found("Projects found.", data)
        }
    }

    /// Users holding `role` and/or whose interest contains `interest`.
    pub fn find_users(&self, role: Option<&str>, interest: Option<&str>) -> Envelope {
        let role = non_blank(role);
        let interest = non_blank(interest);
        if role.is_none() && interest.is_none() {
            return Envelope::failure("Please specify a role or interest to search for.");
        }

        let data: Vec<Value> = self
            .snapshot
            .users
            .iter()
            .filter(|u| role.map_or(true, |r| u.roles.iter().any(|have| have.eq_ignore_ascii_case(r))))
            .filter(|u| interest.map_or(true, |i| contains_ci(&u.interest, i)))
            .filter_map(|u| serde_json::to_value(u).ok())
            .collect();

        if data.is_empty() {
            Envelope::found("No users found matching your criteria.", data)
        } else {
            Envelope::found("Users found.", data)
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
