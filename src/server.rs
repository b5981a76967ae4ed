//! HTTP surface: `POST /convert` multipart decoding, JSON error bodies, health and profile listing.

use crate::error::ExportError;
use crate::export::{ExportOutput, ExportService, SizedUpload};
use crate::request::{RequestFields, Upload};
use axum::Router;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tower_http::trace::TraceLayer;

const SINGLE_FILE_FIELD: &str = "image";
const MULTI_FILE_FIELD: &str = "images";

#[derive(Debug, Clone)]
pub struct AppState {
    pub service: ExportService,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/convert", post(convert))
        .route("/health", get(health))
        .route("/profiles", get(profiles))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ProfileEntry {
    id: String,
    name: String,
    description: String,
    output_condition_identifier: String,
    sha256: String,
}

async fn profiles(State(state): State<AppState>) -> Json<Vec<ProfileEntry>> {
    let entries = state
        .service
        .profiles()
        .available()
        .into_iter()
        .map(|profile| ProfileEntry {
            id: profile.id().to_string(),
            name: profile.display_name().to_string(),
            description: profile.description().to_string(),
            output_condition_identifier: profile.output_condition_identifier().to_string(),
            sha256: profile.sha256_hex(),
        })
        .collect();
    Json(entries)
}

/// Everything pulled out of one multipart body.
#[derive(Debug, Default)]
struct ConvertForm {
    single: Option<Upload>,
    many: Vec<Upload>,
    fields: RequestFields,
}

async fn read_form(mut multipart: Multipart) -> Result<ConvertForm, ExportError> {
    let mut form = ConvertForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_err)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == SINGLE_FILE_FIELD || name == MULTI_FILE_FIELD {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(multipart_err)?;
            let upload = Upload::new(file_name.as_deref(), content_type.as_deref(), bytes.to_vec());
            if name == SINGLE_FILE_FIELD {
                form.single = Some(upload);
            } else {
                form.many.push(upload);
            }
        } else {
            let value = field.text().await.map_err(multipart_err)?;
            form.fields.push(name, value);
        }
    }
    Ok(form)
}

fn multipart_err(err: MultipartError) -> ExportError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ExportError::SizeLimit(err.body_text())
    } else {
        ExportError::MalformedInput(err.body_text())
    }
}

async fn convert(
    State(state): State<AppState>,
    uri: Uri,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let path = uri.path().to_string();
    let fail = |error: ExportError| ApiError {
        error,
        path: path.clone(),
    };
    let multipart = multipart.map_err(|rejection| {
        fail(ExportError::MalformedInput(rejection.body_text()))
    })?;
    let form = read_form(multipart).await.map_err(fail)?;
    let request = form.fields.to_request().map_err(fail)?;

    let service = state.service.clone();
    let job = match (form.single, form.many) {
        (Some(upload), many) if many.is_empty() => {
            tokio::task::spawn_blocking(move || service.convert(&upload, &request))
        }
        (None, many) if many.is_empty() => {
            return Err(fail(ExportError::MalformedInput(format!(
                "no file uploaded, expected a '{SINGLE_FILE_FIELD}' or '{MULTI_FILE_FIELD}' part"
            ))));
        }
        (single, many) => {
            let mut sized = Vec::with_capacity(many.len() + 1);
            for (index, upload) in single.into_iter().chain(many).enumerate() {
                let (width_px, height_px) = form.fields.size_for(index, &request).map_err(fail)?;
                sized.push(SizedUpload {
                    upload,
                    width_px,
                    height_px,
                });
            }
            if sized.len() == 1 {
                let mut request = request;
                let item = sized.remove(0);
                request.width_px = item.width_px;
                request.height_px = item.height_px;
                tokio::task::spawn_blocking(move || service.convert(&item.upload, &request))
            } else {
                tokio::task::spawn_blocking(move || service.convert_many(&sized, &request))
            }
        }
    };
    let output = job
        .await
        .map_err(|err| fail(ExportError::InternalError(format!("conversion task failed: {err}"))))?
        .map_err(fail)?;
    Ok(attachment(output))
}

/// ASCII `filename` for old clients plus an RFC 5987 `filename*` when the name needs it.
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    if fallback == file_name {
        return format!("attachment; filename=\"{fallback}\"");
    }
    let mut encoded = String::with_capacity(file_name.len() * 3);
    for b in file_name.bytes() {
        if b.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&b) {
            encoded.push(char::from(b));
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

fn attachment(output: ExportOutput) -> Response {
    let disposition = content_disposition(&output.file_name);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, output.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        output.payload,
    )
        .into_response()
}

#[derive(Debug)]
pub struct ApiError {
    pub error: ExportError,
    pub path: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    timestamp: String,
    status: u16,
    error: String,
    message: String,
    path: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = if self.error.is_internal() {
            tracing::error!(kind = self.error.kind(), path = %self.path, error = %self.error, "request failed");
            "internal server error".to_string()
        } else {
            tracing::warn!(kind = self.error.kind(), path = %self.path, error = %self.error, "request rejected");
            self.error.message()
        };
        let body = ErrorBody {
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
            path: self.path,
        };
        (status, Json(body)).into_response()
    }
}
