#![allow(dead_code)]

use docmap::Model;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Model)]
pub struct Address {
    pub street: String,
    pub city: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Model)]
#[model(collection = "people")]
pub struct Person {
    pub name: String,
    pub age: i32,
    #[serde(default)]
    pub tags: Vec<String>,
    pub address: Option<Address>,
    #[serde(default)]
    pub friends: Vec<Person>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Model)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub display_name: String,
    #[serde(rename = "years")]
    pub age: i32,
    #[serde(skip)]
    pub session: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Model)]
#[model(collection = "members", primary_key = "email")]
pub struct Member {
    pub email: String,
    pub age: i32,
}

pub fn person(name: &str, age: i32) -> Person {
    Person {
        name: name.to_string(),
        age,
        tags: Vec::new(),
        address: None,
        friends: Vec::new(),
    }
}

pub fn tagged(name: &str, age: i32, tags: &[&str]) -> Person {
    Person {
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        ..person(name, age)
    }
}

pub fn people() -> Vec<Person> {
    vec![
        tagged("Alice", 20, &["admin"]),
        tagged("Bob", 35, &["staff", "x"]),
        person("Carol", 50),
        tagged("Dave", 28, &["x"]),
        person("Eve", 41),
    ]
}
