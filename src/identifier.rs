//! Global object identifiers of the form `shongo:<domain>:<type>:<id>`.
//!
//! `*` stands for "any" in both the type and the id position. Besides the global form the
//! parser accepts the short local form `<type>:<id>` and a bare `<id>` when the expected
//! type is supplied by the caller.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::object_type::{EntityKind, ObjectType, TypeRegistry};

static LOCAL_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+|\*)$").unwrap());
static LOCAL_TYPED_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z]+|\*):(\d+|\*)$").unwrap());
static GLOBAL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^shongo:(.+):([a-z]+|\*):(\d+|\*)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("identifier '{id}' is invalid")]
    Invalid { id: String },
    #[error("identifier '{id}' doesn't belong to domain '{required_domain}'")]
    InvalidDomain { id: String, required_domain: String },
    #[error("identifier '{id}' isn't of required type '{required_type}'")]
    InvalidType { id: String, required_type: String },
    #[error("identifier '{id}' carries no type and none was given")]
    TypeRequired { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectIdentifier {
    pub object_type: Option<ObjectType>,
    /// `None` denotes a group identifier (`*`).
    pub persistence_id: Option<u64>,
    pub domain: String,
}

impl ObjectIdentifier {
    pub fn new(
        domain: impl Into<String>,
        object_type: Option<ObjectType>,
        persistence_id: Option<u64>,
    ) -> Self {
        Self {
            object_type,
            persistence_id,
            domain: domain.into(),
        }
    }

    /// Identifier of an entity of the given kind in `domain`.
    ///
    /// Panics when the kind is not bound to any object type; only public entities get ids.
    pub fn of(domain: &LocalDomain, kind: EntityKind, persistence_id: u64) -> Self {
        let object_type = TypeRegistry::global()
            .object_type(kind)
            .unwrap_or_else(|| panic!("{kind:?} is not bound to any object type"));
        Self::new(domain.name(), Some(object_type), Some(persistence_id))
    }

    pub fn is_group(&self) -> bool {
        self.object_type.is_none() || self.persistence_id.is_none()
    }

    pub fn is_local(&self, local: &LocalDomain) -> bool {
        self.domain == local.name()
    }

    pub fn format_global(&self) -> String {
        Self::format(&self.domain, self.object_type, self.persistence_id)
    }

    /// `domain` must be non-empty for the result to parse back.
    pub fn format(domain: &str, object_type: Option<ObjectType>, persistence_id: Option<u64>) -> String {
        format!(
            "shongo:{}:{}:{}",
            domain,
            object_type.map_or("*", ObjectType::code),
            persistence_id.map_or_else(|| "*".to_string(), |id| id.to_string())
        )
    }

    pub fn format_local(object_type: Option<ObjectType>, persistence_id: Option<u64>) -> String {
        format!(
            "{}:{}",
            object_type.map_or("*", ObjectType::code),
            persistence_id.map_or_else(|| "*".to_string(), |id| id.to_string())
        )
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_global())
    }
}

/// Name of this installation's identifier namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDomain {
    name: String,
}

fn parse_persistence_id(raw: &str, id: &str) -> Result<Option<u64>, IdentifierError> {
    if raw == "*" {
        return Ok(None);
    }
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| IdentifierError::Invalid { id: id.to_string() })
}

fn parse_object_type(code: &str, id: &str) -> Result<Option<ObjectType>, IdentifierError> {
    if code == "*" {
        return Ok(None);
    }
    ObjectType::from_code(code)
        .map(Some)
        .ok_or_else(|| IdentifierError::Invalid { id: id.to_string() })
}

impl LocalDomain {
    /// Panics on an empty name, which would format identifiers no parser accepts.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "Local domain name must not be empty.");
        Self { name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format_id(&self, object_type: ObjectType, persistence_id: u64) -> String {
        ObjectIdentifier::format(&self.name, Some(object_type), Some(persistence_id))
    }

    pub fn format_entity(&self, kind: EntityKind, persistence_id: u64) -> String {
        ObjectIdentifier::of(self, kind, persistence_id).format_global()
    }

    /// Parse a short `type:id` identifier or a global one belonging to this domain.
    pub fn parse(&self, id: &str) -> Result<ObjectIdentifier, IdentifierError> {
        if let Some(caps) = LOCAL_TYPED_ID.captures(id) {
            return Ok(ObjectIdentifier::new(
                self.name.clone(),
                parse_object_type(&caps[1], id)?,
                parse_persistence_id(&caps[2], id)?,
            ));
        }
        self.parse_in_domain(&self.name, id)
    }

    /// Parse a global identifier of any domain (short forms resolve to this domain).
    pub fn parse_foreign(&self, id: &str) -> Result<ObjectIdentifier, IdentifierError> {
        if let Some(caps) = GLOBAL_ID.captures(id) {
            return Ok(ObjectIdentifier::new(
                caps[1].to_string(),
                parse_object_type(&caps[2], id)?,
                parse_persistence_id(&caps[3], id)?,
            ));
        }
        self.parse(id)
    }

    /// Parse any form, checking the result against `expected`; a bare id takes `expected`.
    pub fn parse_typed(
        &self,
        id: &str,
        expected: Option<ObjectType>,
    ) -> Result<ObjectIdentifier, IdentifierError> {
        let object_type = match expected {
            Some(object_type) => object_type,
            None => self
                .parse_type(id)?
                .ok_or_else(|| IdentifierError::TypeRequired { id: id.to_string() })?,
        };
        let domain = self.parse_domain(id)?;
        if LOCAL_ID.is_match(id) {
            return Ok(ObjectIdentifier::new(
                domain,
                Some(object_type),
                parse_persistence_id(id, id)?,
            ));
        }
        let parsed = match LOCAL_TYPED_ID.captures(id) {
            Some(caps) => ObjectIdentifier::new(
                domain,
                parse_object_type(&caps[1], id)?,
                parse_persistence_id(&caps[2], id)?,
            ),
            None => self.parse_in_domain(&domain, id)?,
        };
        if parsed.object_type != Some(object_type) {
            return Err(IdentifierError::InvalidType {
                id: id.to_string(),
                required_type: object_type.code().to_string(),
            });
        }
        Ok(parsed)
    }

    /// Local persistence id of `id`, which must be of `object_type` and in this domain.
    pub fn parse_local_id(
        &self,
        id: &str,
        object_type: ObjectType,
    ) -> Result<Option<u64>, IdentifierError> {
        if LOCAL_ID.is_match(id) {
            return parse_persistence_id(id, id);
        }
        let parsed = match LOCAL_TYPED_ID.captures(id) {
            Some(caps) => ObjectIdentifier::new(
                self.name.clone(),
                parse_object_type(&caps[1], id)?,
                parse_persistence_id(&caps[2], id)?,
            ),
            None => self.parse_in_domain(&self.name, id)?,
        };
        if parsed.object_type != Some(object_type) {
            return Err(IdentifierError::InvalidType {
                id: id.to_string(),
                required_type: object_type.code().to_string(),
            });
        }
        Ok(parsed.persistence_id)
    }

    pub fn parse_domain(&self, id: &str) -> Result<String, IdentifierError> {
        if LOCAL_ID.is_match(id) || LOCAL_TYPED_ID.is_match(id) {
            return Ok(self.name.clone());
        }
        GLOBAL_ID
            .captures(id)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| IdentifierError::Invalid { id: id.to_string() })
    }

    /// Type carried by `id`; `None` for a bare id or a `*` type.
    pub fn parse_type(&self, id: &str) -> Result<Option<ObjectType>, IdentifierError> {
        if LOCAL_ID.is_match(id) {
            return Ok(None);
        }
        if let Some(caps) = LOCAL_TYPED_ID.captures(id) {
            return parse_object_type(&caps[1], id);
        }
        match GLOBAL_ID.captures(id) {
            Some(caps) => parse_object_type(&caps[2], id),
            None => Err(IdentifierError::Invalid { id: id.to_string() }),
        }
    }

    pub fn is_local(&self, id: &str) -> Result<bool, IdentifierError> {
        Ok(self.parse_domain(id)? == self.name)
    }

    fn parse_in_domain(&self, domain: &str, id: &str) -> Result<ObjectIdentifier, IdentifierError> {
        let caps = GLOBAL_ID
            .captures(id)
            .ok_or_else(|| IdentifierError::Invalid { id: id.to_string() })?;
        if &caps[1] != domain {
            return Err(IdentifierError::InvalidDomain {
                id: id.to_string(),
                required_domain: domain.to_string(),
            });
        }
        Ok(ObjectIdentifier::new(
            domain,
            parse_object_type(&caps[2], id)?,
            parse_persistence_id(&caps[3], id)?,
        ))
    }
}
