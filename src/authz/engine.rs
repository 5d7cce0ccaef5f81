use std::collections::BTreeMap;
use std::sync::Arc;

use crate::authz::context::RequestContext;
use crate::authz::errors::AuthzError;
use crate::authz::reducer;
use crate::authz::schema::{PermissionDefinition, Schema};
use crate::authz::store::RelationStore;
use crate::authz::types::{
    Object, ObjectFilter, PermissionCheckItem, PermissionEval, Relationship, TraversalRequest,
    TraversalResponseItem,
};

/// Object types a relation listing terminates on: the concrete subjects
/// relations ultimately resolve to.
const TERMINAL_SUBJECT_TYPES: [&str; 2] = ["user", "group"];

/// The permission pipeline: validates requests against the schema, runs the
/// store traversal, reduces the paths under precedence rules and evaluates
/// permissions over what survives. Stateless apart from the immutable schema
/// and the store handle, so a single instance serves all requests.
pub struct Service {
    store: Arc<dyn RelationStore>,
    schema: Arc<Schema>,
}

impl Service {
    pub fn new(store: Arc<dyn RelationStore>, schema: Arc<Schema>) -> Self {
        Self { store, schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Checks one named permission between a specific resource and subject.
    pub async fn check_permission(
        &self,
        ctx: &RequestContext<'_>,
        resource: Object,
        subject: Object,
        permission: &str,
        show_matching_paths: bool,
    ) -> Result<PermissionEval, AuthzError> {
        self.schema.validate_object("resource", &resource)?;
        self.schema.validate_object("subject", &subject)?;
        self.schema.validate_permission(&resource, permission)?;

        let request = TraversalRequest {
            start_on: resource,
            forward: true,
            stop_on_types: Vec::new(),
            stop_on: Some(subject),
        };
        let items = self
            .check_permissions(ctx, request, show_matching_paths)
            .await?;

        // No path between the pair means every permission is denied.
        let Some(item) = items.into_iter().next() else {
            return Ok(PermissionEval::default());
        };
        let mut evals = item.permission_evals;
        evals.remove(permission).ok_or_else(|| {
            AuthzError::Internal(format!(
                "permission `{permission}` missing from evaluation map"
            ))
        })
    }

    /// Filtered permission check. The filter carrying an id picks the
    /// traversal direction: a full resource filter traverses forward towards
    /// the subject filter; otherwise the subject filter must carry the id
    /// and the traversal runs backward, stopping on the resource type.
    pub async fn check_permissions_filtered(
        &self,
        ctx: &RequestContext<'_>,
        resource_filter: &ObjectFilter,
        subject_filter: &ObjectFilter,
        show_matching_paths: bool,
    ) -> Result<Vec<PermissionCheckItem>, AuthzError> {
        let request = self.filtered_request(resource_filter, subject_filter)?;
        self.check_permissions(ctx, request, show_matching_paths).await
    }

    fn filtered_request(
        &self,
        resource_filter: &ObjectFilter,
        subject_filter: &ObjectFilter,
    ) -> Result<TraversalRequest, AuthzError> {
        self.schema
            .validate_object_type("resource_filter", &resource_filter.object_type)?;
        self.schema
            .validate_object_type("subject_filter", &subject_filter.object_type)?;

        if let Some(resource) = resource_filter.object() {
            self.schema.validate_object("resource_filter", &resource)?;
            let (stop_on, stop_on_types) = match subject_filter.object() {
                Some(subject) => {
                    self.schema.validate_object("subject_filter", &subject)?;
                    (Some(subject), Vec::new())
                }
                None => (None, vec![subject_filter.object_type.clone()]),
            };
            return Ok(TraversalRequest {
                start_on: resource,
                forward: true,
                stop_on_types,
                stop_on,
            });
        }

        let Some(subject) = subject_filter.object() else {
            return Err(AuthzError::validation(
                "subject_filter",
                subject_filter.to_string(),
                "at least one of resource_filter and subject_filter must carry an id",
            ));
        };
        self.schema.validate_object("subject_filter", &subject)?;
        Ok(TraversalRequest {
            start_on: subject,
            forward: false,
            stop_on_types: vec![resource_filter.object_type.clone()],
            stop_on: None,
        })
    }

    /// Runs the traversal and evaluates every permission of each reached
    /// pair's resource type over its effective paths.
    pub async fn check_permissions(
        &self,
        ctx: &RequestContext<'_>,
        request: TraversalRequest,
        show_matching_paths: bool,
    ) -> Result<Vec<PermissionCheckItem>, AuthzError> {
        let items = self.list_effective_paths(ctx, request).await?;
        Ok(items
            .into_iter()
            .map(|item| {
                let permission_evals = self.evaluate_all_permissions(
                    &item.resource,
                    &item.paths,
                    show_matching_paths,
                );
                PermissionCheckItem {
                    resource: item.resource,
                    subject: item.subject,
                    permission_evals,
                }
            })
            .collect())
    }

    /// Traversal plus reduction: each item keeps only the paths that are
    /// equally best under the start type's precedence rules.
    pub async fn list_effective_paths(
        &self,
        ctx: &RequestContext<'_>,
        request: TraversalRequest,
    ) -> Result<Vec<TraversalResponseItem>, AuthzError> {
        let rules = self.schema.precedence_rules(&request.start_on.object_type);
        let mut items = self.store.list_paths(ctx, &request).await?;
        for item in &mut items {
            item.paths = reducer::effective_paths(std::mem::take(&mut item.paths), rules);
        }
        Ok(items)
    }

    /// Lists effective paths from a resource to every reachable terminal
    /// subject.
    pub async fn list_resource_relations(
        &self,
        ctx: &RequestContext<'_>,
        resource: Object,
    ) -> Result<Vec<TraversalResponseItem>, AuthzError> {
        self.schema.validate_object("resource", &resource)?;
        let request = TraversalRequest {
            start_on: resource,
            forward: true,
            stop_on_types: TERMINAL_SUBJECT_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
            stop_on: None,
        };
        self.list_effective_paths(ctx, request).await
    }

    pub async fn create_relationships(
        &self,
        ctx: &RequestContext<'_>,
        relationships: Vec<Relationship>,
    ) -> Result<(), AuthzError> {
        self.manage_relationships(ctx, Vec::new(), relationships)
            .await
    }

    pub async fn delete_relationships(
        &self,
        ctx: &RequestContext<'_>,
        relationships: Vec<Relationship>,
    ) -> Result<(), AuthzError> {
        self.manage_relationships(ctx, relationships, Vec::new())
            .await
    }

    /// Applies a combined write: every entry is validated before anything is
    /// written, then deletions execute before creations inside a single
    /// transaction.
    pub async fn manage_relationships(
        &self,
        ctx: &RequestContext<'_>,
        to_delete: Vec<Relationship>,
        to_create: Vec<Relationship>,
    ) -> Result<(), AuthzError> {
        for rel in to_delete.iter().chain(to_create.iter()) {
            self.schema.validate_relationship(rel)?;
        }

        let txn = self.store.begin(ctx).await?;
        let tx_ctx = txn.context(ctx);
        let result = async {
            self.store.delete_bulk(&tx_ctx, &to_delete).await?;
            self.store.insert_bulk(&tx_ctx, &to_create).await
        }
        .await;
        drop(tx_ctx);

        match result {
            Ok(()) => {
                txn.commit().await?;
                tracing::debug!(
                    deleted = to_delete.len(),
                    created = to_create.len(),
                    "applied relationship changes"
                );
                Ok(())
            }
            Err(err) => {
                txn.rollback().await;
                Err(err)
            }
        }
    }

    fn evaluate_all_permissions(
        &self,
        resource: &Object,
        paths: &[Vec<Relationship>],
        show_matching_paths: bool,
    ) -> BTreeMap<String, PermissionEval> {
        let Some(def) = self.schema.object_def(&resource.object_type) else {
            return BTreeMap::new();
        };
        def.permissions
            .iter()
            .map(|(name, permission)| {
                (
                    name.clone(),
                    evaluate_permission(permission, paths, show_matching_paths),
                )
            })
            .collect()
    }
}

/// Evaluates one permission over a reduced path set. Any excluded relation
/// anywhere in the set denies outright; otherwise the first path containing
/// an `any_of` relation grants. With `show_matching_paths`, every granting
/// path is recorded, each at most once.
fn evaluate_permission(
    permission: &PermissionDefinition,
    paths: &[Vec<Relationship>],
    show_matching_paths: bool,
) -> PermissionEval {
    let mut eval = PermissionEval::default();

    for except in &permission.except {
        if paths.iter().any(|p| reducer::path_contains(p, except)) {
            return eval;
        }
    }

    let mut matched: Vec<usize> = Vec::new();
    for any_of in &permission.any_of {
        for (idx, path) in paths.iter().enumerate() {
            if reducer::path_contains(path, any_of) {
                eval.allowed = true;
                if !show_matching_paths {
                    return eval;
                }
                if !matched.contains(&idx) {
                    matched.push(idx);
                }
            }
        }
    }

    eval.matching_paths = matched.into_iter().map(|idx| paths[idx].clone()).collect();
    eval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::memory::MemoryRelationStore;

    const TEST_SCHEMA: &str = r#"
schema_version: "1.0"
objects:
  user: {}
  group:
    relations:
      member: { subject_types: [user] }
  folder:
    relations:
      owner: { subject_types: [user, group] }
      member: { subject_types: [user, group] }
      parent: { subject_types: [folder] }
    permissions:
      view: { any_of: [member, owner] }
  document:
    relations:
      owner: { subject_types: [user, group] }
      editor: { subject_types: [user, group, folder] }
      banned: { subject_types: [user] }
      parent: { subject_types: [folder] }
    permissions:
      edit: { any_of: [owner, editor], except: [banned] }
    precedence_rules:
      - { rule: path_with, relation: owner }
      - { rule: path_without, relation: member }
      - { rule: path_with_fewer, relation: parent }
"#;

    fn service() -> Service {
        let schema = Arc::new(Schema::from_yaml(TEST_SCHEMA).unwrap());
        Service::new(Arc::new(MemoryRelationStore::new()), schema)
    }

    fn rel(resource: &str, relation: &str, subject: &str) -> Relationship {
        Relationship {
            resource: Object::parse(resource).unwrap(),
            subject: Object::parse(subject).unwrap(),
            relation: relation.to_string(),
        }
    }

    async fn seed(service: &Service, relationships: Vec<Relationship>) {
        let ctx = RequestContext::new();
        service
            .create_relationships(&ctx, relationships)
            .await
            .unwrap();
    }

    async fn check_edit(service: &Service, subject: &str, show: bool) -> PermissionEval {
        let ctx = RequestContext::new();
        service
            .check_permission(
                &ctx,
                Object::new("document", "d1"),
                Object::parse(subject).unwrap(),
                "edit",
                show,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_direct_owner_can_edit() {
        let service = service();
        seed(&service, vec![rel("document:d1", "owner", "user:alice")]).await;

        let eval = check_edit(&service, "user:alice", false).await;
        assert!(eval.allowed);
        assert!(eval.matching_paths.is_empty());

        // No relationship, no permission.
        let eval = check_edit(&service, "user:mallory", false).await;
        assert!(!eval.allowed);
    }

    #[tokio::test]
    async fn test_edit_inherited_through_parent_folder() {
        let service = service();
        seed(
            &service,
            vec![
                rel("document:d1", "parent", "folder:f1"),
                rel("folder:f1", "owner", "user:bob"),
            ],
        )
        .await;

        let eval = check_edit(&service, "user:bob", true).await;
        assert!(eval.allowed);
        assert_eq!(eval.matching_paths.len(), 1);
        assert_eq!(eval.matching_paths[0].len(), 2);
    }

    #[tokio::test]
    async fn test_precedence_selects_owner_path() {
        let service = service();
        seed(
            &service,
            vec![
                rel("document:d1", "owner", "user:alice"),
                rel("document:d1", "parent", "folder:f1"),
                rel("folder:f1", "member", "user:alice"),
            ],
        )
        .await;

        let ctx = RequestContext::new();
        let items = service
            .list_effective_paths(
                &ctx,
                TraversalRequest {
                    start_on: Object::new("document", "d1"),
                    forward: true,
                    stop_on_types: vec![],
                    stop_on: Some(Object::new("user", "alice")),
                },
            )
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].paths,
            vec![vec![rel("document:d1", "owner", "user:alice")]]
        );
    }

    #[tokio::test]
    async fn test_excluded_relation_denies() {
        let service = service();
        // The editor and banned paths tie under the document's precedence
        // rules, so both reach the evaluator.
        seed(
            &service,
            vec![
                rel("document:d1", "editor", "user:alice"),
                rel("document:d1", "banned", "user:alice"),
            ],
        )
        .await;

        let eval = check_edit(&service, "user:alice", true).await;
        assert!(!eval.allowed);
        assert!(eval.matching_paths.is_empty());
    }

    #[tokio::test]
    async fn test_dominated_excluded_path_is_not_effective() {
        let service = service();
        // `path_with owner` makes the owner path strictly better than the
        // banned path, so reduction removes the exclusion before the
        // evaluator ever sees it.
        seed(
            &service,
            vec![
                rel("document:d1", "owner", "user:alice"),
                rel("document:d1", "banned", "user:alice"),
            ],
        )
        .await;

        assert!(check_edit(&service, "user:alice", false).await.allowed);
    }

    #[test]
    fn test_evaluator_allow_is_monotone_exclusion_is_not() {
        let permission = PermissionDefinition {
            any_of: vec!["owner".into(), "editor".into()],
            except: vec!["banned".into()],
        };
        let editor = vec![rel("document:d1", "editor", "user:alice")];
        let owner = vec![rel("document:d1", "owner", "user:alice")];
        let banned = vec![rel("document:d1", "banned", "user:alice")];

        let mut paths = vec![editor];
        assert!(evaluate_permission(&permission, &paths, false).allowed);

        // Adding granting paths never flips an allow.
        paths.push(owner);
        assert!(evaluate_permission(&permission, &paths, false).allowed);

        // Adding an excluded path does.
        paths.push(banned);
        assert!(!evaluate_permission(&permission, &paths, false).allowed);
    }

    #[tokio::test]
    async fn test_matching_path_recorded_once_per_permission() {
        let service = service();
        // One walk carrying both `editor` and `owner` labels.
        seed(
            &service,
            vec![
                rel("document:d1", "editor", "folder:f1"),
                rel("folder:f1", "owner", "user:carol"),
            ],
        )
        .await;

        let eval = check_edit(&service, "user:carol", true).await;
        assert!(eval.allowed);
        assert_eq!(eval.matching_paths.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_permission_rejected() {
        let service = service();
        let ctx = RequestContext::new();
        let err = service
            .check_permission(
                &ctx,
                Object::new("document", "d1"),
                Object::new("user", "alice"),
                "destroy",
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_filtered_check_forward_by_subject_type() {
        let service = service();
        seed(
            &service,
            vec![
                rel("document:d1", "owner", "user:alice"),
                rel("document:d1", "editor", "user:bob"),
            ],
        )
        .await;

        let ctx = RequestContext::new();
        let items = service
            .check_permissions_filtered(
                &ctx,
                &ObjectFilter::parse("document:d1").unwrap(),
                &ObjectFilter::parse("user").unwrap(),
                false,
            )
            .await
            .unwrap();

        // One item per reached user, each carrying the full permission map
        // of the document type.
        assert_eq!(items.len(), 2);
        for item in &items {
            assert_eq!(item.resource, Object::new("document", "d1"));
            assert!(item.permission_evals["edit"].allowed);
            assert!(!item.permission_evals.contains_key("view"));
        }
    }

    #[tokio::test]
    async fn test_filtered_check_backward_from_subject() {
        let service = service();
        seed(
            &service,
            vec![
                rel("document:d1", "owner", "user:alice"),
                rel("document:d2", "banned", "user:alice"),
            ],
        )
        .await;

        let ctx = RequestContext::new();
        let items = service
            .check_permissions_filtered(
                &ctx,
                &ObjectFilter::parse("document").unwrap(),
                &ObjectFilter::parse("user:alice").unwrap(),
                false,
            )
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        let d1 = items
            .iter()
            .find(|i| i.resource == Object::new("document", "d1"))
            .unwrap();
        assert!(d1.permission_evals["edit"].allowed);
        let d2 = items
            .iter()
            .find(|i| i.resource == Object::new("document", "d2"))
            .unwrap();
        assert!(!d2.permission_evals["edit"].allowed);
    }

    #[tokio::test]
    async fn test_filtered_check_requires_an_id() {
        let service = service();
        let ctx = RequestContext::new();
        let err = service
            .check_permissions_filtered(
                &ctx,
                &ObjectFilter::parse("document").unwrap(),
                &ObjectFilter::parse("user").unwrap(),
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_list_resource_relations_stops_on_terminal_subjects() {
        let service = service();
        seed(
            &service,
            vec![
                rel("document:d1", "owner", "user:alice"),
                rel("document:d1", "parent", "folder:f1"),
                rel("folder:f1", "owner", "group:staff"),
            ],
        )
        .await;

        let ctx = RequestContext::new();
        let items = service
            .list_resource_relations(&ctx, Object::new("document", "d1"))
            .await
            .unwrap();

        let subjects: Vec<String> = items.iter().map(|i| i.subject.to_string()).collect();
        assert!(subjects.contains(&"user:alice".to_string()));
        assert!(subjects.contains(&"group:staff".to_string()));
        // The folder is an intermediate node, not a listed subject.
        assert!(!subjects.contains(&"folder:f1".to_string()));
    }

    #[tokio::test]
    async fn test_manage_validates_before_writing() {
        let service = service();
        let ctx = RequestContext::new();
        let err = service
            .manage_relationships(
                &ctx,
                vec![],
                vec![
                    rel("document:d1", "owner", "user:alice"),
                    // Relation undeclared on document.
                    rel("document:d1", "steward", "user:bob"),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Validation { .. }));

        // Nothing was written.
        assert!(!check_edit(&service, "user:alice", false).await.allowed);
    }

    #[tokio::test]
    async fn test_manage_deletes_before_creates() {
        let service = service();
        let target = rel("document:d1", "owner", "user:alice");
        seed(&service, vec![target.clone()]).await;

        // Delete and recreate the same tuple in one request: the create
        // lands because deletions run first.
        let ctx = RequestContext::new();
        service
            .manage_relationships(&ctx, vec![target.clone()], vec![target])
            .await
            .unwrap();
        assert!(check_edit(&service, "user:alice", false).await.allowed);

        // A plain delete removes the grant.
        service
            .delete_relationships(&ctx, vec![rel("document:d1", "owner", "user:alice")])
            .await
            .unwrap();
        assert!(!check_edit(&service, "user:alice", false).await.allowed);
    }
}
