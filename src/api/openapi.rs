//! OpenAPI documentation and schema generation
//!
//! The document is generated at compile time with utoipa and served at
//! `/openapi.json`.

use utoipa::OpenApi;

/// OpenAPI documentation for the shorts-dl REST API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "shorts-dl REST API",
        version = "0.1.0",
        description = "Submit short-video URLs, follow their progress and cancel them",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790", description = "Local development server")
    ),
    paths(
        // Tasks
        crate::api::routes::submit_task,
        crate::api::routes::get_task,
        crate::api::routes::cancel_task,

        // Users
        crate::api::routes::user_status,
        crate::api::routes::user_tasks,
        crate::api::routes::cancel_user_tasks,

        // System
        crate::api::routes::queue_stats,
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        crate::types::TaskId,
        crate::types::Correlation,
        crate::types::Event,
        crate::types::UserStatus,
        crate::types::QueueStats,
        crate::task::Task,
        crate::task::TaskState,
        crate::task::FailureReason,
        crate::task::MediaMetadata,
        crate::api::routes::SubmitTaskRequest,
        crate::api::routes::SubmitTaskResponse,
        crate::api::routes::CancelAllResponse,
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "tasks", description = "Submit, inspect and cancel individual tasks"),
        (name = "users", description = "Per-user status and bulk cancellation"),
        (name = "system", description = "Queue statistics, health, events and this document"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Registers the `X-Api-Key` header scheme
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "api_key",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new("X-Api-Key"),
                    ),
                ),
            );
        }
    }
}
