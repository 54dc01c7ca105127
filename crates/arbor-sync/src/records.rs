//! Upsert candidates built from collected items.
//!
//! Each builder splits a local item into its natural key (written on
//! create only) and its mutable payload. Parent ids come from the run's
//! session; timestamps come from the run, never from the wall clock, so
//! two runs with the same timestamp write identical rows.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value as JsonValue};

use arbor_core::defaults;
use arbor_core::{
    build_slug, derive_doc_type, derive_stakeholder_identity, EntityKind, JsonMap,
    LocalDocument, LocalProject, LocalStakeholder, LocalUser, LocalWorkspace, NaturalKey,
    Result, ServiceStatus, UpsertCandidate,
};

/// Wire format of the run timestamp (RFC 3339, millisecond precision, `Z`).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn object(value: JsonValue) -> JsonMap {
    match value {
        JsonValue::Object(map) => map,
        _ => JsonMap::new(),
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn non_empty_str<'a>(payload: &'a JsonValue, field: &str) -> Option<&'a str> {
    payload
        .get(field)
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
}

pub fn workspace_candidate(ws: &LocalWorkspace) -> UpsertCandidate {
    UpsertCandidate {
        kind: EntityKind::Workspace,
        key: NaturalKey::new().with("code", &ws.code),
        payload: object(json!({
            "name": ws.name,
            "description": ws.description,
            "style_config": ws.style_config,
            "metadata": {
                "path": path_str(&ws.rel_path),
                "has_config": ws.has_config,
                "has_readme": ws.has_readme,
            },
        })),
        label: ws.code.clone(),
    }
}

pub fn project_candidate(project: &LocalProject, workspace_id: &str) -> UpsertCandidate {
    UpsertCandidate {
        kind: EntityKind::Project,
        key: NaturalKey::new()
            .with("workspace_id", workspace_id)
            .with("code", &project.code),
        payload: object(json!({
            "name": project.name,
            "status": project.status.as_str(),
            "metadata": {
                "path": path_str(&project.rel_path),
                "source": defaults::SYNC_SOURCE,
            },
        })),
        label: format!("{}/{}", project.workspace_code, project.code),
    }
}

/// Documents are keyed by workspace and slug; the project id is payload.
pub fn document_candidate(
    doc: &LocalDocument,
    workspace_id: &str,
    project_id: &str,
    run_timestamp: &str,
) -> UpsertCandidate {
    let slug = build_slug(&doc.project_code, &doc.file_name);
    UpsertCandidate {
        kind: EntityKind::Document,
        label: format!("{}/{}", doc.workspace_code, slug),
        key: NaturalKey::new()
            .with("workspace_id", workspace_id)
            .with("slug", slug),
        payload: object(json!({
            "project_id": project_id,
            "title": doc.file_name,
            "doc_type": derive_doc_type(&doc.file_name).as_str(),
            "content": doc.content,
            "metadata": {
                "path": path_str(&doc.rel_path),
                "source": defaults::SYNC_SOURCE,
                "synced_at": run_timestamp,
            },
        })),
    }
}

/// Stakeholders carry no enforced key. The candidate's key holds only the
/// parent workspace; identity lives at `metadata.json_id`.
///
/// Fails when no identity can be derived from the payload.
pub fn stakeholder_candidate(
    stakeholder: &LocalStakeholder,
    workspace_id: &str,
    run_timestamp: &str,
) -> Result<UpsertCandidate> {
    let payload = &stakeholder.payload;
    let json_id = derive_stakeholder_identity(payload)?;

    let name = non_empty_str(payload, "nombre_organizacion")
        .or_else(|| non_empty_str(payload, "nombre_corto"))
        .unwrap_or_default();
    let kind = non_empty_str(payload, "tipo_stakeholder").unwrap_or_default();
    let contacts = payload.get("contactos");
    let principal = contacts
        .and_then(|c| c.get("principal"))
        .cloned()
        .unwrap_or_else(|| json!({}));
    let secundario = contacts
        .and_then(|c| c.get("secundario"))
        .cloned()
        .unwrap_or(JsonValue::Null);

    Ok(UpsertCandidate {
        kind: EntityKind::Stakeholder,
        label: format!("{}:{}", stakeholder.workspace_code, json_id),
        key: NaturalKey::new().with("workspace_id", workspace_id),
        payload: object(json!({
            "name": name,
            "kind": kind,
            "contact": {
                "principal": principal,
                "secundario": secundario,
            },
            "metadata": {
                "source": defaults::SYNC_SOURCE,
                "synced_at": run_timestamp,
                "json_id": json_id,
                "original_data": payload,
            },
        })),
    })
}

/// One row per (user, service). Only whether the service is configured is
/// stored, never its credentials.
pub fn service_config_candidate(
    user: &LocalUser,
    service: &ServiceStatus,
    run_timestamp: &str,
) -> UpsertCandidate {
    UpsertCandidate {
        kind: EntityKind::UserServiceConfig,
        key: NaturalKey::new()
            .with("user_id", &user.user_id)
            .with("service_name", &service.name),
        payload: object(json!({
            "is_configured": service.is_configured,
            "last_checked": run_timestamp,
            "metadata": {
                "service_key": service.key,
                "has_config": service.is_configured,
                "source": defaults::SYNC_SOURCE,
            },
        })),
        label: format!("{}/{}", user.user_id, service.name),
    }
}
