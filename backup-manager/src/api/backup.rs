//! Backup management endpoints.

use super::error::ApiError;
use super::AppState;
use crate::models::{BackupEntry, BackupJob};
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct CreateBackupRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// Acknowledgement of a backup, delete or restore request
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelBackupResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatusResponse {
    pub in_progress: bool,
    pub job: Option<BackupJob>,
}

/// POST /entities/{id}/backups - Start a backup
pub async fn create_backup(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    Json(req): Json<CreateBackupRequest>,
) -> Result<Json<OperationResponse>, ApiError> {
    tracing::info!("Backup requested for {} (name: {:?})", entity_id, req.name);

    let ticket = state.manager.create_backup(&entity_id, req.name.as_deref()).await?;

    Ok(Json(OperationResponse {
        success: true,
        started: Some(true),
        job_id: Some(ticket.job_id),
        filename: Some(ticket.filename),
        ..Default::default()
    }))
}

/// GET /entities/{id}/backups - List archives, newest first
pub async fn list_backups(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<Json<Vec<BackupEntry>>, ApiError> {
    Ok(Json(state.manager.list_backups(&entity_id).await?))
}

/// DELETE /entities/{id}/backups/{filename} - Delete an archive
pub async fn delete_backup(
    State(state): State<AppState>,
    Path((entity_id, filename)): Path<(String, String)>,
) -> Result<Json<OperationResponse>, ApiError> {
    state.manager.delete_backup(&entity_id, &filename).await?;
    Ok(Json(OperationResponse {
        success: true,
        ..Default::default()
    }))
}

/// POST /entities/{id}/backups/{filename}/restore - Restore an archive
pub async fn restore_backup(
    State(state): State<AppState>,
    Path((entity_id, filename)): Path<(String, String)>,
) -> Result<Json<OperationResponse>, ApiError> {
    tracing::warn!("Restoring {} over the working tree of {}", filename, entity_id);

    let report = state.manager.restore_backup(&entity_id, &filename).await?;
    Ok(Json(OperationResponse {
        success: true,
        restored_files: Some(report.extracted.files),
        ..Default::default()
    }))
}

/// POST /entities/{id}/backups/cancel - Cancel the running backup
pub async fn cancel_backup(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Json<CancelBackupResponse> {
    Json(CancelBackupResponse {
        cancelled: state.manager.cancel_backup(&entity_id),
    })
}

/// GET /entities/{id}/backups/status - Current or last job status
pub async fn backup_status(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Json<BackupStatusResponse> {
    Json(BackupStatusResponse {
        in_progress: state.manager.is_backup_in_progress(&entity_id),
        job: state.manager.get_backup_status(&entity_id),
    })
}
