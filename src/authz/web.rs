use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::authz::context::RequestContext;
use crate::authz::engine::Service;
use crate::authz::errors::AuthzError;
use crate::authz::types::{
    Object, ObjectFilter, PermissionCheckItem, PermissionEval, Relationship,
    TraversalResponseItem,
};

pub fn router(service: Arc<Service>) -> Router {
    Router::new()
        .route("/permissions/{permission}", get(check_permission))
        .route("/permissions", get(check_permissions))
        .route(
            "/resources/{resource}/relations",
            get(list_resource_relations),
        )
        .route("/relations", post(manage_relationships))
        .with_state(service)
}

fn parse_object_param(field: &str, value: Option<&String>) -> Result<Object, AuthzError> {
    let raw = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthzError::validation(field, "", "missing parameter"))?;
    Object::parse(raw).ok_or_else(|| AuthzError::validation(field, raw, "expected format `type:id`"))
}

fn parse_filter_param(field: &str, value: Option<&String>) -> Result<ObjectFilter, AuthzError> {
    let raw = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthzError::validation(field, "", "missing parameter"))?;
    ObjectFilter::parse(raw)
        .ok_or_else(|| AuthzError::validation(field, raw, "expected format `type` or `type:id`"))
}

#[derive(Debug, Deserialize)]
struct CheckPermissionParams {
    resource: Option<String>,
    subject: Option<String>,
    #[serde(default)]
    show_matching_paths: bool,
}

/// GET /permissions/{permission}?resource=type:id&subject=type:id
async fn check_permission(
    State(service): State<Arc<Service>>,
    Path(permission): Path<String>,
    Query(params): Query<CheckPermissionParams>,
) -> Result<Json<PermissionEval>, AuthzError> {
    let resource = parse_object_param("resource", params.resource.as_ref())?;
    let subject = parse_object_param("subject", params.subject.as_ref())?;

    let ctx = RequestContext::new();
    let eval = service
        .check_permission(
            &ctx,
            resource,
            subject,
            &permission,
            params.show_matching_paths,
        )
        .await?;
    Ok(Json(eval))
}

#[derive(Debug, Deserialize)]
struct CheckPermissionsParams {
    resource_filter: Option<String>,
    subject_filter: Option<String>,
    #[serde(default)]
    show_matching_paths: bool,
}

/// GET /permissions?resource_filter=type[:id]&subject_filter=type[:id]
async fn check_permissions(
    State(service): State<Arc<Service>>,
    Query(params): Query<CheckPermissionsParams>,
) -> Result<Json<Vec<PermissionCheckItem>>, AuthzError> {
    let resource_filter = parse_filter_param("resource_filter", params.resource_filter.as_ref())?;
    let subject_filter = parse_filter_param("subject_filter", params.subject_filter.as_ref())?;

    let ctx = RequestContext::new();
    let items = service
        .check_permissions_filtered(
            &ctx,
            &resource_filter,
            &subject_filter,
            params.show_matching_paths,
        )
        .await?;
    Ok(Json(items))
}

/// GET /resources/{resource}/relations
async fn list_resource_relations(
    State(service): State<Arc<Service>>,
    Path(resource): Path<String>,
) -> Result<Json<Vec<TraversalResponseItem>>, AuthzError> {
    let resource = parse_object_param("resource", Some(&resource))?;

    let ctx = RequestContext::new();
    let items = service.list_resource_relations(&ctx, resource).await?;
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
struct ManageRelationshipsRequest {
    #[serde(default)]
    delete: Vec<Relationship>,
    #[serde(default)]
    create: Vec<Relationship>,
}

/// POST /relations with optional `delete` and `create` relationship lists.
async fn manage_relationships(
    State(service): State<Arc<Service>>,
    body: String,
) -> Result<StatusCode, AuthzError> {
    let body: ManageRelationshipsRequest = serde_json::from_str(&body)
        .map_err(|e| AuthzError::validation("body", "", format!("invalid request body: {e}")))?;

    let ctx = RequestContext::new();
    service
        .manage_relationships(&ctx, body.delete, body.create)
        .await?;
    Ok(StatusCode::OK)
}
