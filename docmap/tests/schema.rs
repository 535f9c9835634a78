mod common;

use docmap::{
    memory::MockDriver,
    prelude::*,
    schema::FieldType,
};
use pretty_assertions::assert_eq;

use common::{Account, Address, Person};

fn field_names(schema: &Schema) -> Vec<&str> {
    schema.fields().map(|field| field.name()).collect()
}

#[test]
fn derived_schema_lists_fields_in_declaration_order() {
    let schema = Person::schema();

    assert_eq!(schema.model_name(), "Person");
    assert_eq!(schema.primary_key(), "_id");
    assert_eq!(field_names(schema), ["name", "age", "tags", "address", "friends"]);
    assert_eq!(Person::collection_name(), "people");

    let address = schema.resolve("address").unwrap();
    assert!(address.is_optional());
    assert_eq!(address.nested_model().map(|model| model.name()), Some("Address"));

    let friends = schema.resolve("friends").unwrap();
    assert!(friends.is_array());
    assert_eq!(friends.nested_model().map(|model| model.schema().model_name()), Some("Person"));
}

#[test]
fn self_references_resolve_lazily() {
    assert!(Person::schema().resolve_path("friends.friends.address.street").is_ok());
    assert!(matches!(
        Person::schema().field_paths(),
        Err(DocMapError::RecursionLimit(_)),
    ));

    let paths = Address::schema().field_paths().unwrap();
    assert_eq!(
        paths.iter().map(FieldPath::as_str).collect::<Vec<_>>(),
        ["street", "city"],
    );
}

#[test]
fn serde_names_drive_the_schema() {
    let schema = Account::schema();

    assert_eq!(field_names(schema), ["displayName", "years"]);
    assert_eq!(schema.resolve("years").unwrap().field_type(), &FieldType::Int32);
    assert!(matches!(
        schema.resolve("age"),
        Err(DocMapError::AttributeResolution { .. }),
    ));
    assert!(schema.resolve("session").is_err());
    assert_eq!(Account::collection_name(), "accounts");
}

#[test]
fn serialized_documents_match_schema_names() {
    let _scope = scope();
    let driver = MockDriver::new();
    let account = Account {
        display_name: "al".to_string(),
        age: 41,
        session: Some("token".to_string()),
    };

    as_document(account, &driver).save().unwrap();

    let accounts = as_collection::<Account, _>(&driver);
    let found = accounts
        .find(accounts.field("years").unwrap().gt(40))
        .first()
        .unwrap()
        .unwrap();

    assert_eq!(found.display_name, "al");
    assert_eq!(found.session, None);
}

#[test]
fn depth_limit_applies_to_proxies() {
    let driver = MockDriver::new();
    let users = as_collection::<Person, _>(&driver);

    let deep = std::iter::repeat_n("friends", 40).collect::<Vec<_>>().join(".");
    assert!(matches!(users.path(&deep), Err(DocMapError::RecursionLimit(_))));
}
