use crate::Result;
use camino::Utf8Path;
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

/// The identity an admission request is made under
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub cluster_roles: Vec<String>,

    #[serde(default)]
    pub user_info: UserInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub uid: String,

    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default)]
    pub extra: BTreeMap<String, Vec<String>>,
}

impl RequestInfo {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).into_app_err("parsing user info")
    }

    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = fs::read_to_string(path).into_app_err_with(|| format!("reading user info file '{path}'"))?;
        Self::from_yaml(&text).map_err(|e| app_err!("loading '{path}': {e}"))
    }
}
