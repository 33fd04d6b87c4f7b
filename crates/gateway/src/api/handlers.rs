use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tracing::info;

use barge_broker::Broker;

use super::{
    ApiError, AppState, DiagnoseData, Envelope, ListData, ListedFile, UploadData, UploadQuery,
    UploadedFile, validate_storage_id,
};

/// How long the diagnose fan-out collects service answers.
const DIAGNOSE_WINDOW: Duration = Duration::from_millis(1500);

/// `POST /files/upload`: multipart field `file`, one or more files,
/// optional `?storage_id=`.
///
/// Files upload sequentially; the storage id minted for the first file
/// threads through the rest so everything lands in one bucket.
pub async fn upload<B: Broker>(
    State(state): State<Arc<AppState<B>>>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<Envelope<UploadData>>, ApiError> {
    let mut storage_id = query.storage_id.filter(|s| !s.is_empty());
    if let Some(id) = &storage_id {
        validate_storage_id(id)?;
    }

    let mut uploaded: Vec<UploadedFile> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut bucket: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::bad_request(format!(
            "failed to parse multipart form: {e}; ensure the request is multipart/form-data"
        ))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ApiError::bad_request("file field is missing a filename"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read file {filename}: {e}")))?;

        let response = state
            .client
            .upload(&filename, &bytes, storage_id.clone())
            .await
            .map_err(ApiError::from)?;
        if !response.success {
            return Err(ApiError::internal(format!(
                "file upload failed for {filename}: {}",
                response.error.unwrap_or_default()
            )));
        }

        let id = response
            .storage_id
            .clone()
            .ok_or_else(|| ApiError::internal("upload response carried no storage id"))?;
        storage_id = Some(id.clone());
        bucket = Some(id.clone());

        // The response lists the whole bucket; keep each file once.
        for file in response.files.unwrap_or_default() {
            if seen.insert(file.filename.clone()) {
                uploaded.push(UploadedFile {
                    original_name: file.filename.clone(),
                    file_name: file.filename.clone(),
                    size: file.size,
                    path: format!("/files/s/{id}/d/{}", file.filename),
                });
            }
        }
    }

    let Some(bucket) = bucket else {
        return Err(ApiError::bad_request(
            "no files found; send files under the multipart field 'file'",
        ));
    };

    let total_size = uploaded.iter().map(|f| f.size).sum();
    info!(storage_id = %bucket, files = uploaded.len(), total_size, "upload complete");

    Ok(Json(Envelope::ok(UploadData {
        url: format!("/files/s/{bucket}"),
        storage_id: bucket,
        file_count: uploaded.len(),
        files: uploaded,
        total_size,
    })))
}

/// `GET /files/s/{id}`: bucket listing.
pub async fn list<B: Broker>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<ListData>>, ApiError> {
    validate_storage_id(&id)?;

    let response = state.client.list(&id).await.map_err(ApiError::from)?;
    if !response.success {
        return Err(ApiError::not_found(
            response.error.unwrap_or_else(|| "storage not found".into()),
        ));
    }

    let files = response
        .files
        .unwrap_or_default()
        .into_iter()
        .map(|f| ListedFile {
            name: f.filename.clone(),
            url: format!("/files/s/{id}/d/{}", f.filename),
            filename: f.filename,
            size: f.size,
        })
        .collect();

    Ok(Json(Envelope::ok(ListData {
        storage_id: id,
        files,
        total_size: response.total_size.unwrap_or(0),
    })))
}

/// `GET /files/s/{id}/d/{filename}`: download the reassembled bytes.
pub async fn download<B: Broker>(
    State(state): State<Arc<AppState<B>>>,
    Path((id, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    validate_storage_id(&id)?;
    if filename.is_empty() {
        return Err(ApiError::bad_request("filename cannot be empty"));
    }

    let bytes = state
        .client
        .download(&id, &filename)
        .await
        .map_err(ApiError::from)?;

    let disposition = format!("attachment; filename=\"{filename}\"");
    let disposition = header::HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| header::HeaderValue::from_static("attachment"));

    Ok((
        [
            (
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("application/octet-stream"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// `DELETE /files/s/{id}/d/{filename}`: remove one file.
pub async fn delete_file<B: Broker>(
    State(state): State<Arc<AppState<B>>>,
    Path((id, filename)): Path<(String, String)>,
) -> Result<Json<Envelope<()>>, ApiError> {
    validate_storage_id(&id)?;

    let response = state
        .client
        .delete_file(&id, &filename)
        .await
        .map_err(ApiError::from)?;
    if !response.success {
        return Err(ApiError::not_found(
            response.error.unwrap_or_else(|| "file not found".into()),
        ));
    }
    Ok(Json(Envelope::ok(())))
}

/// `DELETE /files/s/{id}`: remove a whole bucket.
pub async fn delete_folder<B: Broker>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<()>>, ApiError> {
    validate_storage_id(&id)?;

    let response = state
        .client
        .delete_folder(&id)
        .await
        .map_err(ApiError::from)?;
    if !response.success {
        return Err(ApiError::not_found(
            response.error.unwrap_or_else(|| "storage not found".into()),
        ));
    }
    Ok(Json(Envelope::ok(())))
}

/// `GET /test/services`: fan a health check out over the diagnose
/// exchange and report whoever answered in time.
pub async fn diagnose<B: Broker>(
    State(state): State<Arc<AppState<B>>>,
) -> Result<Json<Envelope<DiagnoseData>>, ApiError> {
    let services = state
        .client
        .diagnose(DIAGNOSE_WINDOW)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(Envelope::ok(DiagnoseData { services })))
}
