use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LibError, Result};
use crate::integrity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphId(pub u64);

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GraphId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

impl From<u64> for GraphId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A stored account. The password hash never leaves the store; use
/// [`PublicUser`] for anything that is returned to a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub userid: UserId,
    pub fullname: String,
    pub email: String,
    pub username: String,
    #[serde(rename = "passwordHash")]
    pub password_hash: String,
    #[serde(rename = "isAdmin", default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicUser {
    pub userid: UserId,
    pub fullname: String,
    pub email: String,
    pub username: String,
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,
}

impl From<&User> for PublicUser {
    fn from(value: &User) -> Self {
        Self {
            userid: value.userid,
            fullname: value.fullname.clone(),
            email: value.email.clone(),
            username: value.username.clone(),
            is_admin: value.is_admin,
        }
    }
}

impl From<User> for PublicUser {
    fn from(value: User) -> Self {
        Self {
            userid: value.userid,
            fullname: value.fullname,
            email: value.email,
            username: value.username,
            is_admin: value.is_admin,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserPayload {
    pub fullname: String,
    pub email: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "isAdmin", default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub fullname: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub is_admin: bool,
}

impl CreateUserPayload {
    pub fn normalize(self) -> Result<NewUser> {
        Ok(NewUser {
            fullname: required_text(self.fullname, "Full name is required", "fullname")?,
            email: normalize_email(self.email)?,
            username: required_text(self.username, "Username is required", "username")?,
            password: required_password(self.password)?,
            is_admin: self.is_admin,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserPayload {
    pub userid: Option<UserId>,
    pub fullname: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(rename = "isAdmin")]
    pub is_admin: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub fullname: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub is_admin: Option<bool>,
}

impl UpdateUserPayload {
    /// Validates the supplied fields against the user addressed by the request path.
    pub fn normalize(self, target: UserId) -> Result<UserPatch> {
        if let Some(userid) = self.userid.filter(|userid| *userid != target) {
            return Err(LibError::invalid(
                "userid does not match the request path",
                anyhow!("body userid {} differs from path id {}", userid, target),
            ));
        }

        Ok(UserPatch {
            fullname: self
                .fullname
                .map(|value| required_text(value, "Full name is required", "fullname"))
                .transpose()?,
            email: self.email.map(normalize_email).transpose()?,
            username: self
                .username
                .map(|value| required_text(value, "Username is required", "username"))
                .transpose()?,
            password: self.password.map(required_password).transpose()?,
            is_admin: self.is_admin,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginUser {
    pub userid: UserId,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub user: LoginUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub nodeid: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from_nodeid: String,
    pub to_nodeid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub graphid: GraphId,
    pub userid: UserId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u32,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGraphPayload {
    pub name: String,
    pub description: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone)]
pub struct GraphDefinition {
    pub name: String,
    pub description: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl CreateGraphPayload {
    pub fn normalize(self) -> Result<GraphDefinition> {
        let name = required_text(self.name, "Graph name is required", "name")?;
        let description = required_text(
            self.description,
            "Graph description is required",
            "description",
        )?;
        integrity::ensure_graph_integrity(&self.nodes, &self.edges)?;

        Ok(GraphDefinition {
            name,
            description,
            nodes: self.nodes,
            edges: self.edges,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateGraphPayload {
    pub graphid: Option<GraphId>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<u32>,
    pub nodes: Option<Vec<GraphNode>>,
    pub edges: Option<Vec<GraphEdge>>,
}

/// Validated partial update. Node and edge integrity is checked against the
/// merged graph by the store, since either side may be omitted here.
#[derive(Debug, Clone, Default)]
pub struct GraphPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<u32>,
    pub nodes: Option<Vec<GraphNode>>,
    pub edges: Option<Vec<GraphEdge>>,
}

impl UpdateGraphPayload {
    pub fn normalize(self, target: GraphId) -> Result<GraphPatch> {
        if let Some(graphid) = self.graphid.filter(|graphid| *graphid != target) {
            return Err(LibError::invalid(
                "graphid does not match the request path",
                anyhow!("body graphid {} differs from path id {}", graphid, target),
            ));
        }
        if self.version == Some(0) {
            return Err(LibError::invalid(
                "Graph version starts at 1",
                anyhow!("patch supplied version 0"),
            ));
        }

        Ok(GraphPatch {
            name: self
                .name
                .map(|value| required_text(value, "Graph name is required", "name"))
                .transpose()?,
            description: self
                .description
                .map(|value| {
                    required_text(value, "Graph description is required", "description")
                })
                .transpose()?,
            version: self.version,
            nodes: self.nodes,
            edges: self.edges,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEnvelope<T> {
    pub data: T,
    pub is_success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
}

impl<T> DataEnvelope<T> {
    pub fn one(data: T) -> Self {
        Self {
            data,
            is_success: true,
            total_count: None,
        }
    }
}

impl<T> DataEnvelope<Vec<T>> {
    pub fn list(items: Vec<T>) -> Self {
        let total = items.len();
        Self {
            data: items,
            is_success: true,
            total_count: Some(total),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEnvelope {
    pub is_success: bool,
    pub message: String,
}

impl FailureEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            message: message.into(),
        }
    }
}

fn required_text(value: String, public: &'static str, field: &str) -> Result<String> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(LibError::invalid(public, anyhow!("empty {}", field)));
    }
    Ok(value)
}

fn required_password(value: String) -> Result<String> {
    if value.is_empty() {
        return Err(LibError::invalid(
            "Password is required",
            anyhow!("empty password"),
        ));
    }
    Ok(value)
}

fn normalize_email(value: String) -> Result<String> {
    let email = value.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    };
    if !valid {
        return Err(LibError::invalid_with_code(
            "invalid_email",
            "A valid email address is required",
            anyhow!("malformed email {:?}", email),
        ));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::{
        CreateGraphPayload, CreateUserPayload, DataEnvelope, GraphEdge, GraphId, GraphNode,
        UpdateGraphPayload, UpdateUserPayload, UserId,
    };

    fn node(id: &str) -> GraphNode {
        GraphNode {
            nodeid: id.to_string(),
            x: 0.0,
            y: 0.0,
        }
    }

    #[test]
    fn create_user_normalizes_email_and_trims() {
        let payload = CreateUserPayload {
            fullname: "  Ada Lovelace ".to_string(),
            email: " Ada@Example.COM ".to_string(),
            username: "ada".to_string(),
            password: "secret".to_string(),
            is_admin: false,
        };

        let user = payload.normalize().expect("payload should normalize");
        assert_eq!(user.fullname, "Ada Lovelace");
        assert_eq!(user.email, "ada@example.com");
    }

    #[test]
    fn create_user_rejects_empty_fields() {
        let payload = CreateUserPayload {
            fullname: "A".to_string(),
            email: "a@x.com".to_string(),
            username: "   ".to_string(),
            password: "p".to_string(),
            is_admin: false,
        };

        let err = payload.normalize().expect_err("blank username should fail");
        assert_eq!(err.public, "Username is required");
    }

    #[test]
    fn create_user_rejects_malformed_email() {
        let payload = CreateUserPayload {
            fullname: "A".to_string(),
            email: "not-an-email".to_string(),
            username: "a".to_string(),
            password: "p".to_string(),
            is_admin: false,
        };

        let err = payload.normalize().expect_err("email without @ should fail");
        assert_eq!(err.code, "invalid_email");
    }

    #[test]
    fn update_user_rejects_mismatched_id() {
        let payload = UpdateUserPayload {
            userid: Some(UserId(4)),
            ..Default::default()
        };

        assert!(payload.normalize(UserId(3)).is_err());
    }

    #[test]
    fn update_user_rejects_unknown_fields() {
        let parsed = serde_json::from_str::<UpdateUserPayload>(r#"{"gender": "x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn create_graph_rejects_non_array_nodes() {
        let parsed = serde_json::from_str::<CreateGraphPayload>(
            r#"{"name": "g", "description": "d", "nodes": "oops", "edges": []}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn create_graph_rejects_dangling_edges() {
        let payload = CreateGraphPayload {
            name: "Flow".to_string(),
            description: "steps".to_string(),
            nodes: vec![node("a")],
            edges: vec![GraphEdge {
                from_nodeid: "a".to_string(),
                to_nodeid: "b".to_string(),
            }],
        };

        let err = payload.normalize().expect_err("dangling edge should fail");
        assert_eq!(err.code, "graph_unknown_node_reference");
    }

    #[test]
    fn update_graph_keeps_absent_fields_unset() {
        let payload: UpdateGraphPayload =
            serde_json::from_str(r#"{"name": " Renamed "}"#).expect("payload should parse");
        let patch = payload.normalize(GraphId(1)).expect("patch should normalize");

        assert_eq!(patch.name.as_deref(), Some("Renamed"));
        assert!(patch.description.is_none());
        assert!(patch.nodes.is_none());
        assert!(patch.edges.is_none());
    }

    #[test]
    fn list_envelope_carries_total_count() {
        let value = serde_json::to_value(DataEnvelope::list(vec![1, 2, 3]))
            .expect("envelope should serialize");
        assert_eq!(value["totalCount"], 3);
        assert_eq!(value["isSuccess"], true);

        let single = serde_json::to_value(DataEnvelope::one(7)).expect("envelope should serialize");
        assert!(single.get("totalCount").is_none());
    }
}
