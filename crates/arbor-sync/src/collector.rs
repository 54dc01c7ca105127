//! Local source tree walker.
//!
//! The layout is fixed and shallow, so collection is a handful of
//! `read_dir` calls rather than a recursive walk:
//!
//! ```text
//! <root>/workspaces/<code>/README.md
//! <root>/workspaces/<code>/config-estilo.json
//! <root>/workspaces/<code>/{active,archived}-projects/<project>/*.md
//! <root>/workspaces/<code>/stakeholders/fichas-json/*.json
//! <root>/.arbor/users/<user>/profile.json
//! ```
//!
//! Only an unreadable root is fatal. Anything wrong below it is logged at
//! WARN. Unreadable documents are kept as [`UnreadableFile`]s so the run
//! reports them as failed; other bad files are left out of the snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use arbor_core::defaults;
use arbor_core::{
    EntityKind, Error, JsonMap, LocalDocument, LocalProject, LocalSnapshot, LocalStakeholder,
    LocalUser, LocalWorkspace, ProjectStatus, Result, ServiceStatus, UnreadableFile,
};

/// Builds a [`LocalSnapshot`] from a source root.
#[derive(Debug, Clone)]
pub struct EntityCollector {
    root: PathBuf,
}

impl EntityCollector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Collect every entity under the root.
    ///
    /// `services` is the detected service table (see [`detect_services`]);
    /// it is carried into the snapshot unchanged.
    pub fn collect(&self, services: Vec<ServiceStatus>) -> Result<LocalSnapshot> {
        let meta = fs::metadata(&self.root).map_err(|e| {
            Error::Config(format!(
                "source root {} is not readable: {}",
                self.root.display(),
                e
            ))
        })?;
        if !meta.is_dir() {
            return Err(Error::Config(format!(
                "source root {} is not a directory",
                self.root.display()
            )));
        }

        let mut snapshot = LocalSnapshot {
            services,
            ..Default::default()
        };

        let workspaces_dir = self.root.join(defaults::WORKSPACES_DIR);
        if workspaces_dir.is_dir() {
            for dir in subdirectories(&workspaces_dir) {
                let Some(code) = file_name(&dir) else {
                    continue;
                };
                if code == defaults::TEMPLATE_WORKSPACE {
                    debug!(subsystem = "collector", "Skipping template workspace");
                    continue;
                }
                self.collect_workspace(&dir, code, &mut snapshot);
            }
        } else {
            warn!(
                subsystem = "collector",
                path = %workspaces_dir.display(),
                "No workspaces directory under source root"
            );
        }

        snapshot.users = self.collect_users();

        info!(
            subsystem = "collector",
            workspaces = snapshot.workspaces.len(),
            projects = snapshot.projects.len(),
            documents = snapshot.documents.len(),
            stakeholders = snapshot.stakeholders.len(),
            users = snapshot.users.len(),
            unreadable = snapshot.unreadable.len(),
            "Collected local snapshot"
        );
        Ok(snapshot)
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root).unwrap_or(path).to_path_buf()
    }

    fn collect_workspace(&self, dir: &Path, code: String, snapshot: &mut LocalSnapshot) {
        let readme = dir.join(defaults::README_FILE);
        let has_readme = readme.is_file();
        let description = if has_readme {
            match fs::read_to_string(&readme) {
                Ok(text) => text
                    .chars()
                    .take(defaults::WORKSPACE_DESCRIPTION_CHARS)
                    .collect(),
                Err(e) => {
                    warn!(
                        subsystem = "collector",
                        path = %readme.display(),
                        error = %e,
                        "Unreadable README"
                    );
                    code.clone()
                }
            }
        } else {
            code.clone()
        };

        let style_path = dir.join(defaults::STYLE_CONFIG_FILE);
        let has_config = style_path.is_file();
        let style_config = if has_config {
            read_style_config(&style_path)
        } else {
            JsonMap::new()
        };

        for (status_dir, status) in [
            (defaults::ACTIVE_PROJECTS_DIR, ProjectStatus::Active),
            (defaults::ARCHIVED_PROJECTS_DIR, ProjectStatus::Archived),
        ] {
            for project_dir in subdirectories(&dir.join(status_dir)) {
                self.collect_project(&project_dir, &code, status, snapshot);
            }
        }

        let stakeholders_dir = defaults::STAKEHOLDERS_DIR
            .iter()
            .fold(dir.to_path_buf(), |path, segment| path.join(segment));
        for file in files_with_extension(&stakeholders_dir, "json") {
            match read_json(&file) {
                Ok(payload) => snapshot.stakeholders.push(LocalStakeholder {
                    workspace_code: code.clone(),
                    rel_path: self.relative(&file),
                    payload,
                }),
                Err(e) => {
                    warn!(
                        subsystem = "collector",
                        path = %file.display(),
                        error = %e,
                        "Skipping unparseable stakeholder file"
                    );
                }
            }
        }

        snapshot.workspaces.push(LocalWorkspace {
            name: code.clone(),
            code,
            description,
            style_config,
            rel_path: self.relative(dir),
            has_config,
            has_readme,
        });
    }

    fn collect_project(
        &self,
        dir: &Path,
        workspace_code: &str,
        status: ProjectStatus,
        snapshot: &mut LocalSnapshot,
    ) {
        let Some(code) = file_name(dir) else {
            return;
        };

        for file in files_with_extension(dir, "md") {
            let Some(doc_name) = file_name(&file) else {
                continue;
            };
            match fs::read_to_string(&file) {
                Ok(content) => snapshot.documents.push(LocalDocument {
                    workspace_code: workspace_code.to_string(),
                    project_code: code.clone(),
                    file_name: doc_name,
                    rel_path: self.relative(&file),
                    content,
                }),
                Err(e) => {
                    warn!(
                        subsystem = "collector",
                        path = %file.display(),
                        error = %e,
                        "Unreadable document"
                    );
                    snapshot.unreadable.push(UnreadableFile {
                        kind: EntityKind::Document,
                        rel_path: self.relative(&file),
                        reason: e.to_string(),
                    });
                }
            }
        }

        snapshot.projects.push(LocalProject {
            workspace_code: workspace_code.to_string(),
            name: arbor_core::project_display_name(&code),
            code,
            status,
            rel_path: self.relative(dir),
        });
    }

    fn collect_users(&self) -> Vec<LocalUser> {
        let users_dir = self
            .root
            .join(defaults::TOOL_DIR)
            .join(defaults::USERS_DIR);
        if !users_dir.is_dir() {
            warn!(subsystem = "collector", path = %users_dir.display(), "No users directory");
            return Vec::new();
        }

        let mut users = Vec::new();
        for dir in subdirectories(&users_dir) {
            let Some(dir_name) = file_name(&dir) else {
                continue;
            };
            let profile = dir.join(defaults::PROFILE_FILE);
            if !profile.is_file() {
                debug!(subsystem = "collector", user = %dir_name, "User directory without profile");
                continue;
            }
            match read_json(&profile) {
                Ok(value) => {
                    let user_id = value
                        .get("user_id")
                        .and_then(JsonValue::as_str)
                        .filter(|s| !s.trim().is_empty())
                        .map(str::to_string)
                        .unwrap_or(dir_name);
                    users.push(LocalUser { user_id });
                }
                Err(e) => {
                    warn!(
                        subsystem = "collector",
                        path = %profile.display(),
                        error = %e,
                        "Skipping unreadable user profile"
                    );
                }
            }
        }
        users
    }
}

/// Which services are configured, judged by their marker variables.
///
/// `lookup` is usually the process environment after the env file has been
/// loaded; a blank value counts as unset.
pub fn detect_services<F>(lookup: F) -> Vec<ServiceStatus>
where
    F: Fn(&str) -> Option<String>,
{
    defaults::SERVICES
        .iter()
        .map(|(key, name, marker)| ServiceStatus {
            key: key.to_string(),
            name: name.to_string(),
            is_configured: lookup(marker).is_some_and(|v| !v.trim().is_empty()),
        })
        .collect()
}

fn read_style_config(path: &Path) -> JsonMap {
    match read_json(path) {
        Ok(JsonValue::Object(map)) => map,
        Ok(_) => {
            warn!(
                subsystem = "collector",
                path = %path.display(),
                "Style config is not a JSON object, ignoring"
            );
            JsonMap::new()
        }
        Err(e) => {
            warn!(
                subsystem = "collector",
                path = %path.display(),
                error = %e,
                "Invalid style config, ignoring"
            );
            JsonMap::new()
        }
    }
}

fn read_json(path: &Path) -> Result<JsonValue> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Entries of `dir`, sorted by name. A missing directory is empty; an
/// unreadable one is logged and treated as empty.
fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut paths: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(e) => {
            warn!(
                subsystem = "collector",
                path = %dir.display(),
                error = %e,
                "Unreadable directory"
            );
            return Vec::new();
        }
    };
    paths.sort();
    paths
}

fn subdirectories(dir: &Path) -> Vec<PathBuf> {
    sorted_entries(dir)
        .into_iter()
        .filter(|p| p.is_dir() && !is_hidden(p))
        .collect()
}

fn files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
    sorted_entries(dir)
        .into_iter()
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(extension))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let err = EntityCollector::new("/definitely/not/here")
            .collect(Vec::new())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_root_that_is_a_file_is_config_error() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "file.txt", "x");
        let err = EntityCollector::new(tmp.path().join("file.txt"))
            .collect(Vec::new())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_root_yields_empty_snapshot() {
        let tmp = TempDir::new().unwrap();
        let snapshot = EntityCollector::new(tmp.path()).collect(Vec::new()).unwrap();
        assert!(snapshot.workspaces.is_empty());
        assert!(snapshot.users.is_empty());
    }

    #[test]
    fn test_workspace_fields() {
        let tmp = TempDir::new().unwrap();
        let long_readme = "r".repeat(500);
        write(tmp.path(), "workspaces/acme/README.md", &long_readme);
        write(tmp.path(), "workspaces/acme/config-estilo.json", r#"{"tone":"formal"}"#);
        write(tmp.path(), "workspaces/bare/.keep", "");

        let snapshot = EntityCollector::new(tmp.path()).collect(Vec::new()).unwrap();
        assert_eq!(snapshot.workspaces.len(), 2);

        let acme = &snapshot.workspaces[0];
        assert_eq!(acme.code, "acme");
        assert_eq!(acme.name, "acme");
        assert_eq!(acme.description.chars().count(), 200);
        assert_eq!(acme.style_config.get("tone"), Some(&serde_json::json!("formal")));
        assert!(acme.has_config && acme.has_readme);
        assert_eq!(acme.rel_path, PathBuf::from("workspaces/acme"));

        let bare = &snapshot.workspaces[1];
        assert_eq!(bare.description, "bare");
        assert!(bare.style_config.is_empty());
        assert!(!bare.has_config && !bare.has_readme);
    }

    #[test]
    fn test_invalid_style_config_keeps_workspace() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "workspaces/acme/config-estilo.json", "{not json");
        let snapshot = EntityCollector::new(tmp.path()).collect(Vec::new()).unwrap();
        assert_eq!(snapshot.workspaces.len(), 1);
        assert!(snapshot.workspaces[0].style_config.is_empty());
        assert!(snapshot.workspaces[0].has_config);
    }

    #[test]
    fn test_template_workspace_is_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "workspaces/template/active-projects/x/README.md", "t");
        write(tmp.path(), "workspaces/acme/README.md", "a");
        let snapshot = EntityCollector::new(tmp.path()).collect(Vec::new()).unwrap();
        assert_eq!(snapshot.workspaces.len(), 1);
        assert!(snapshot.projects.is_empty());
        assert!(snapshot.documents.is_empty());
    }

    #[test]
    fn test_projects_and_documents() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "workspaces/acme/active-projects/proj-a/README.md", "# A");
        write(tmp.path(), "workspaces/acme/active-projects/proj-a/Tasks.MD", "- t");
        write(tmp.path(), "workspaces/acme/active-projects/proj-a/image.png", "png");
        write(tmp.path(), "workspaces/acme/active-projects/proj-a/sub/deep.md", "no");
        write(tmp.path(), "workspaces/acme/archived-projects/old-thing/notes.md", "n");

        let snapshot = EntityCollector::new(tmp.path()).collect(Vec::new()).unwrap();

        let projects: HashMap<&str, &LocalProject> = snapshot
            .projects
            .iter()
            .map(|p| (p.code.as_str(), p))
            .collect();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects["proj-a"].status, ProjectStatus::Active);
        assert_eq!(projects["proj-a"].name, "Proj A");
        assert_eq!(projects["old-thing"].status, ProjectStatus::Archived);
        assert_eq!(projects["old-thing"].name, "Old Thing");

        let mut docs: Vec<&str> = snapshot.documents.iter().map(|d| d.file_name.as_str()).collect();
        docs.sort();
        assert_eq!(docs, vec!["README.md", "Tasks.MD", "notes.md"]);
        assert!(snapshot
            .documents
            .iter()
            .all(|d| d.workspace_code == "acme"));
    }

    #[test]
    fn test_non_utf8_document_is_kept_as_unreadable() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "workspaces/acme/active-projects/p/README.md", "# P");
        let bad = tmp.path().join("workspaces/acme/active-projects/p/notes.md");
        fs::write(&bad, [0xff, 0xfe, 0x00, 0xc3]).unwrap();

        let snapshot = EntityCollector::new(tmp.path()).collect(Vec::new()).unwrap();

        assert_eq!(snapshot.documents.len(), 1);
        assert_eq!(snapshot.unreadable.len(), 1);
        let u = &snapshot.unreadable[0];
        assert_eq!(u.kind, EntityKind::Document);
        assert_eq!(
            u.rel_path,
            PathBuf::from("workspaces/acme/active-projects/p/notes.md")
        );
        assert_eq!(snapshot.count(EntityKind::Document), 2);
    }

    #[test]
    fn test_stakeholders_skip_unparseable_files() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "workspaces/acme/stakeholders/fichas-json/aliado.json",
            r#"{"id":"aliado-001"}"#,
        );
        write(tmp.path(), "workspaces/acme/stakeholders/fichas-json/broken.json", "{");
        write(tmp.path(), "workspaces/acme/stakeholders/fichas-json/notes.txt", "x");

        let snapshot = EntityCollector::new(tmp.path()).collect(Vec::new()).unwrap();
        assert_eq!(snapshot.stakeholders.len(), 1);
        let s = &snapshot.stakeholders[0];
        assert_eq!(s.workspace_code, "acme");
        assert_eq!(s.payload["id"], "aliado-001");
        assert_eq!(
            s.rel_path,
            PathBuf::from("workspaces/acme/stakeholders/fichas-json/aliado.json")
        );
    }

    #[test]
    fn test_users_from_profiles() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".arbor/users/alice/profile.json", r#"{"user_id":"alice-01"}"#);
        write(tmp.path(), ".arbor/users/bob/profile.json", r#"{"name":"Bob"}"#);
        write(tmp.path(), ".arbor/users/carol/notes.txt", "no profile");
        write(tmp.path(), ".arbor/users/.hidden/profile.json", r#"{"user_id":"ghost"}"#);
        write(tmp.path(), ".arbor/users/dave/profile.json", "{broken");

        let snapshot = EntityCollector::new(tmp.path()).collect(Vec::new()).unwrap();
        let ids: Vec<&str> = snapshot.users.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["alice-01", "bob"]);
    }

    #[test]
    fn test_detect_services() {
        let env: HashMap<&str, &str> = [("OPENAI_API_KEY", "sk-x"), ("REDDIT_CLIENT_ID", "  ")]
            .into_iter()
            .collect();
        let services = detect_services(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(services.len(), 4);
        let configured: Vec<&str> = services
            .iter()
            .filter(|s| s.is_configured)
            .map(|s| s.key.as_str())
            .collect();
        assert_eq!(configured, vec!["openai"]);
        assert_eq!(services[0].name, "Google Workspace");
    }

    #[test]
    fn test_services_carried_into_snapshot() {
        let tmp = TempDir::new().unwrap();
        let services = detect_services(|_| None);
        let snapshot = EntityCollector::new(tmp.path()).collect(services).unwrap();
        assert_eq!(snapshot.services.len(), 4);
    }
}
