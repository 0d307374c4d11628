use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type Id = u64;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub birthday: Option<NaiveDate>,
    /// Filled in from the friendship edges on read, ignored on write.
    #[serde(default)]
    pub friends: Vec<Id>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Film {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub mpa: Option<Mpa>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    /// Filled in from the like edges on read, ignored on write.
    #[serde(default)]
    pub likes: Vec<Id>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Mpa {
    pub id: Id,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Genre {
    pub id: Id,
    #[serde(default)]
    pub name: String,
}
