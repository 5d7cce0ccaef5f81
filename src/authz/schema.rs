use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::authz::errors::AuthzError;
use crate::authz::types::{Object, Relationship};

/// The authorization schema: object types, their relations and permissions,
/// and the path-precedence rules used to select effective paths.
/// Loaded once at startup and immutable afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct Schema {
    pub schema_version: String,
    #[serde(default)]
    pub objects: HashMap<String, ObjectDefinition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectDefinition {
    #[serde(default)]
    pub relations: HashMap<String, RelationDefinition>,
    #[serde(default)]
    pub permissions: HashMap<String, PermissionDefinition>,
    #[serde(default)]
    pub precedence_rules: Vec<PrecedenceRule>,
}

/// Allowed subject types for one relation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelationDefinition {
    #[serde(default)]
    pub subject_types: Vec<String>,
}

/// How a permission composes from relation labels: granted when any `any_of`
/// relation appears in a path, denied outright when any `except` relation
/// does.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionDefinition {
    #[serde(default)]
    pub any_of: Vec<String>,
    #[serde(default)]
    pub except: Vec<String>,
}

/// One path-precedence rule, tagged by kind. Rules are consulted in declared
/// order; the first rule that discriminates two paths decides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PrecedenceRule {
    /// A path containing `relation` beats one that does not.
    PathWith { relation: String },
    /// A path not containing `relation` beats one that does.
    PathWithout { relation: String },
    /// A path with strictly fewer `relation` edges beats one with more.
    PathWithFewer { relation: String },
}

impl Schema {
    pub fn from_yaml(data: &str) -> Result<Self, AuthzError> {
        let schema: Schema = serde_yaml::from_str(data)?;
        schema.check_consistency()?;
        Ok(schema)
    }

    pub fn load(path: &Path) -> Result<Self, AuthzError> {
        let data = std::fs::read_to_string(path).map_err(|source| AuthzError::SchemaLoad {
            path: path.display().to_string(),
            source,
        })?;
        let schema = Self::from_yaml(&data)?;
        tracing::info!(
            version = %schema.schema_version,
            objects = schema.objects.len(),
            "Loaded authorization schema"
        );
        Ok(schema)
    }

    /// Every allowed subject type must itself be a declared object type;
    /// a relationship naming an undeclared type could never validate.
    fn check_consistency(&self) -> Result<(), AuthzError> {
        for (type_name, def) in &self.objects {
            for (relation, rel_def) in &def.relations {
                for subject_type in &rel_def.subject_types {
                    if !self.objects.contains_key(subject_type) {
                        return Err(AuthzError::SchemaInvalid(format!(
                            "relation `{relation}` on `{type_name}` allows undeclared subject type `{subject_type}`"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn object_def(&self, object_type: &str) -> Option<&ObjectDefinition> {
        self.objects.get(object_type)
    }

    /// Precedence rules of the given object type; empty when the type is
    /// unknown or declares none.
    pub fn precedence_rules(&self, object_type: &str) -> &[PrecedenceRule] {
        self.objects
            .get(object_type)
            .map(|d| d.precedence_rules.as_slice())
            .unwrap_or(&[])
    }

    pub fn validate_object(&self, field: &str, object: &Object) -> Result<(), AuthzError> {
        if object.object_type.is_empty() || object.id.is_empty() {
            return Err(AuthzError::validation(
                field,
                object.to_string(),
                "expected format `type:id`",
            ));
        }
        if !self.objects.contains_key(&object.object_type) {
            return Err(AuthzError::validation(
                field,
                object.to_string(),
                format!("unknown object type `{}`", object.object_type),
            ));
        }
        Ok(())
    }

    pub fn validate_object_type(&self, field: &str, object_type: &str) -> Result<(), AuthzError> {
        if object_type.is_empty() {
            return Err(AuthzError::validation(
                field,
                object_type,
                "object type must not be empty",
            ));
        }
        if !self.objects.contains_key(object_type) {
            return Err(AuthzError::validation(
                field,
                object_type,
                "unknown object type",
            ));
        }
        Ok(())
    }

    pub fn validate_relationship(&self, relationship: &Relationship) -> Result<(), AuthzError> {
        self.validate_object("resource", &relationship.resource)?;
        self.validate_object("subject", &relationship.subject)?;
        if relationship.relation.is_empty() {
            return Err(AuthzError::validation(
                "relation",
                "",
                "relation must not be empty",
            ));
        }

        let def = self
            .objects
            .get(&relationship.resource.object_type)
            .ok_or_else(|| {
                AuthzError::validation(
                    "resource",
                    relationship.resource.to_string(),
                    format!(
                        "unknown object type `{}`",
                        relationship.resource.object_type
                    ),
                )
            })?;
        let relation = def.relations.get(&relationship.relation).ok_or_else(|| {
            AuthzError::validation(
                "relation",
                &relationship.relation,
                format!(
                    "not declared on object type `{}`",
                    relationship.resource.object_type
                ),
            )
        })?;
        if !relation
            .subject_types
            .iter()
            .any(|t| *t == relationship.subject.object_type)
        {
            return Err(AuthzError::validation(
                "subject",
                relationship.subject.to_string(),
                format!(
                    "type `{}` is not allowed for relation `{}`",
                    relationship.subject.object_type, relationship.relation
                ),
            ));
        }
        Ok(())
    }

    pub fn validate_permission(&self, object: &Object, permission: &str) -> Result<(), AuthzError> {
        self.validate_object("resource", object)?;
        let declared = self
            .objects
            .get(&object.object_type)
            .map(|d| d.permissions.contains_key(permission))
            .unwrap_or(false);
        if !declared {
            return Err(AuthzError::validation(
                "permission",
                permission,
                format!("not declared on object type `{}`", object.object_type),
            ));
        }
        Ok(())
    }
}
