//! Request endpoints.

use axum::{
    Json, Router,
    extract::{Multipart, State},
    routing::post,
};
use cmsvs_common::{AppError, AppResult};
use cmsvs_db::entities::file::Model as FileModel;
use cmsvs_db::entities::request::{Model as RequestModel, RequestStatus};
use cmsvs_db::repositories::RequestFilter;
use serde::{Deserialize, Serialize};

use cmsvs_core::{Actor, CreateRequestInput, UpdateDetailsInput};

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Create request payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestRequest {
    pub full_name: String,
    pub personal_number: String,
    pub phone_number: String,
    pub building_name: String,
    pub road_name: String,
    pub building_number: String,
    pub civil_defense_file_number: Option<String>,
    pub building_permit_number: Option<String>,
    #[serde(default)]
    pub licenses_section: bool,
    #[serde(default)]
    pub fire_equipment_section: bool,
    #[serde(default)]
    pub commercial_records_section: bool,
    #[serde(default)]
    pub engineering_offices_section: bool,
    #[serde(default)]
    pub hazardous_materials_section: bool,
}

/// Request response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub id: i32,
    pub request_number: String,
    pub unique_code: String,
    pub user_id: i32,
    pub status: RequestStatus,
    pub is_archived: bool,
    pub full_name: String,
    pub personal_number: String,
    pub phone_number: String,
    pub building_name: String,
    pub road_name: String,
    pub building_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub civil_defense_file_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building_permit_number: Option<String>,
    pub licenses_section: bool,
    pub fire_equipment_section: bool,
    pub commercial_records_section: bool,
    pub engineering_offices_section: bool,
    pub hazardous_materials_section: bool,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl From<RequestModel> for RequestResponse {
    fn from(r: RequestModel) -> Self {
        Self {
            id: r.id,
            request_number: r.request_number,
            unique_code: r.unique_code,
            user_id: r.user_id,
            status: r.status,
            is_archived: r.is_archived,
            full_name: r.full_name,
            personal_number: r.personal_number,
            phone_number: r.phone_number,
            building_name: r.building_name,
            road_name: r.road_name,
            building_number: r.building_number,
            civil_defense_file_number: r.civil_defense_file_number,
            building_permit_number: r.building_permit_number,
            licenses_section: r.licenses_section,
            fire_equipment_section: r.fire_equipment_section,
            commercial_records_section: r.commercial_records_section,
            engineering_offices_section: r.engineering_offices_section,
            hazardous_materials_section: r.hazardous_materials_section,
            created_at: r.created_at.to_rfc3339(),
            updated_at: r.updated_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Create a new request owned by the authenticated user.
async fn create_request(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateRequestRequest>,
) -> AppResult<ApiResponse<RequestResponse>> {
    let input = CreateRequestInput {
        user_id: user.id,
        full_name: req.full_name,
        personal_number: req.personal_number,
        phone_number: req.phone_number,
        building_name: req.building_name,
        road_name: req.road_name,
        building_number: req.building_number,
        civil_defense_file_number: req.civil_defense_file_number,
        building_permit_number: req.building_permit_number,
        licenses_section: req.licenses_section,
        fire_equipment_section: req.fire_equipment_section,
        commercial_records_section: req.commercial_records_section,
        engineering_offices_section: req.engineering_offices_section,
        hazardous_materials_section: req.hazardous_materials_section,
    };

    let created = state.request_service.create(input).await?;
    Ok(ApiResponse::ok(created.into()))
}

/// Show request payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowRequestRequest {
    pub request_id: i32,
}

/// Fetch one request.
async fn show_request(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ShowRequestRequest>,
) -> AppResult<ApiResponse<RequestResponse>> {
    let model = state
        .request_service
        .get(req.request_id, Actor::from(&user))
        .await?;
    Ok(ApiResponse::ok(model.into()))
}

/// List requests payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequestsRequest {
    /// Owner filter, admins only; non-admins always see their own.
    pub user_id: Option<i32>,
    pub status: Option<RequestStatus>,
    pub is_archived: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

const fn default_limit() -> u64 {
    50
}

/// List requests, newest first.
async fn list_requests(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ListRequestsRequest>,
) -> AppResult<ApiResponse<Vec<RequestResponse>>> {
    let filter = RequestFilter {
        user_id: req.user_id,
        status: req.status,
        is_archived: req.is_archived,
        limit: req.limit.min(100),
        offset: req.offset,
    };
    let models = state
        .request_service
        .list(filter, Actor::from(&user))
        .await?;
    Ok(ApiResponse::ok(models.into_iter().map(Into::into).collect()))
}

/// Update status payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub request_id: i32,
    pub status: RequestStatus,
}

/// Move a request to a new status.
async fn update_status(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<UpdateStatusRequest>,
) -> AppResult<ApiResponse<RequestResponse>> {
    let updated = state
        .request_service
        .update_status(req.request_id, req.status, Actor::from(&user))
        .await?;
    Ok(ApiResponse::ok(updated.into()))
}

/// Update details payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDetailsRequest {
    pub request_id: i32,
    pub phone_number: Option<String>,
    pub building_name: Option<String>,
    pub road_name: Option<String>,
    pub building_number: Option<String>,
    pub civil_defense_file_number: Option<String>,
    pub building_permit_number: Option<String>,
}

/// Edit the mutable detail fields of a request.
async fn update_details(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<UpdateDetailsRequest>,
) -> AppResult<ApiResponse<RequestResponse>> {
    let input = UpdateDetailsInput {
        phone_number: req.phone_number,
        building_name: req.building_name,
        road_name: req.road_name,
        building_number: req.building_number,
        civil_defense_file_number: req.civil_defense_file_number,
        building_permit_number: req.building_permit_number,
    };
    let updated = state
        .request_service
        .update_details(req.request_id, input, Actor::from(&user))
        .await?;
    Ok(ApiResponse::ok(updated.into()))
}

/// Archive payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRequest {
    pub request_id: i32,
}

/// Archive a terminal request.
async fn archive_request(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ArchiveRequest>,
) -> AppResult<ApiResponse<RequestResponse>> {
    let updated = state
        .request_service
        .set_archived(req.request_id, true, Actor::from(&user))
        .await?;
    Ok(ApiResponse::ok(updated.into()))
}

/// Restore a request from the archive.
async fn unarchive_request(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ArchiveRequest>,
) -> AppResult<ApiResponse<RequestResponse>> {
    let updated = state
        .request_service
        .set_archived(req.request_id, false, Actor::from(&user))
        .await?;
    Ok(ApiResponse::ok(updated.into()))
}

/// Delete a request and its attachments.
async fn delete_request(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ArchiveRequest>,
) -> AppResult<ApiResponse<()>> {
    let stored_paths = state
        .request_service
        .delete(req.request_id, Actor::from(&user))
        .await?;
    // Disk cleanup happens after the delete committed.
    state
        .attachment_service
        .remove_stored_files(&stored_paths)
        .await;
    Ok(ApiResponse::ok(()))
}

/// Attachment response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    pub id: i32,
    pub request_id: i32,
    pub original_filename: String,
    pub stored_filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub file_type: String,
    pub file_category: String,
    pub uploaded_at: String,
}

impl From<FileModel> for FileResponse {
    fn from(f: FileModel) -> Self {
        Self {
            id: f.id,
            request_id: f.request_id,
            original_filename: f.original_filename,
            stored_filename: f.stored_filename,
            file_size: f.file_size,
            mime_type: f.mime_type,
            file_type: f.file_type,
            file_category: f.file_category,
            uploaded_at: f.uploaded_at.to_rfc3339(),
        }
    }
}

/// Upload an attachment as multipart form data.
///
/// Expected parts: `requestId`, `category`, optional `fieldId`, and one
/// `file` part carrying the blob. The metadata parts must precede the `file`
/// part, which is streamed straight to disk without buffering the whole
/// upload in memory.
async fn attach_file(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<ApiResponse<FileResponse>> {
    let mut request_id: Option<i32> = None;
    let mut category: Option<String> = None;
    let mut field_id: Option<String> = None;
    let mut record: Option<FileModel> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation("multipart", &e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "requestId" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::validation("requestId", &e.to_string()))?;
                request_id = Some(
                    text.parse()
                        .map_err(|_| AppError::validation("requestId", "must be an integer"))?,
                );
            }
            "category" => {
                category = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::validation("category", &e.to_string()))?,
                );
            }
            "fieldId" => {
                field_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::validation("fieldId", &e.to_string()))?,
                );
            }
            "file" => {
                let request_id = request_id.ok_or_else(|| {
                    AppError::validation("requestId", "must precede the file part")
                })?;
                let category = category.as_deref().ok_or_else(|| {
                    AppError::validation("category", "must precede the file part")
                })?;
                let filename = field
                    .file_name()
                    .map(ToString::to_string)
                    .ok_or_else(|| AppError::validation("file", "missing filename"))?;
                let mime_type = field.content_type().map(ToString::to_string);

                // Ownership gate before touching the disk.
                state
                    .request_service
                    .get(request_id, Actor::from(&user))
                    .await?;

                let chunks = Box::pin(futures::stream::try_unfold(field, |mut field| async move {
                    let chunk = field
                        .chunk()
                        .await
                        .map_err(|e| AppError::validation("file", &e.to_string()))?;
                    Ok(chunk.map(|c| (c, field)))
                }));

                record = Some(
                    state
                        .attachment_service
                        .attach(
                            request_id,
                            category,
                            field_id.as_deref(),
                            &filename,
                            mime_type.as_deref(),
                            chunks,
                        )
                        .await?,
                );
            }
            _ => {}
        }
    }

    let record = record.ok_or_else(|| AppError::validation("file", "missing part"))?;
    Ok(ApiResponse::ok(record.into()))
}

/// List the attachments of a request.
async fn list_files(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ShowRequestRequest>,
) -> AppResult<ApiResponse<Vec<FileResponse>>> {
    state
        .request_service
        .get(req.request_id, Actor::from(&user))
        .await?;
    let files = state.attachment_service.list(req.request_id).await?;
    Ok(ApiResponse::ok(files.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_create_payload_is_camel_case() {
        let json = serde_json::json!({
            "fullName": "Ahmed Al-Sayed",
            "personalNumber": "123456789",
            "phoneNumber": "33112233",
            "buildingName": "Manama Tower",
            "roadName": "Road 2409",
            "buildingNumber": "1204",
            "licensesSection": true,
        });
        let req: CreateRequestRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.personal_number, "123456789");
        assert!(req.licenses_section);
        assert!(!req.fire_equipment_section);
        assert_eq!(req.civil_defense_file_number, None);
    }

    #[test]
    fn test_status_filter_accepts_snake_case_values() {
        let req: ListRequestsRequest =
            serde_json::from_value(serde_json::json!({"status": "in_progress"})).unwrap();
        assert_eq!(req.status, Some(RequestStatus::InProgress));
        assert_eq!(req.limit, 50);
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_request))
        .route("/show", post(show_request))
        .route("/list", post(list_requests))
        .route("/update-status", post(update_status))
        .route("/update-details", post(update_details))
        .route("/archive", post(archive_request))
        .route("/unarchive", post(unarchive_request))
        .route("/delete", post(delete_request))
        .route("/attach", post(attach_file))
        .route("/files", post(list_files))
}
