//! Procedural macros for the docmap project.
//!
//! `#[derive(Model)]` implements `docmap::Model` and `docmap::schema::SchemaType`
//! for a struct with named fields. The generated schema follows the struct's
//! serde attributes so that field names match the serialized documents:
//!
//! - `#[serde(rename = "...")]` on a field sets its stored name
//! - `#[serde(rename_all = "...")]` on the struct renames every field
//! - `#[serde(skip)]` and `#[serde(skip_serializing)]` leave a field out of the schema
//!
//! Collection and primary key are configured with `#[model(...)]`:
//!
//! ```ignore
//! #[derive(Debug, Clone, Serialize, Deserialize, Model)]
//! #[model(collection = "people", primary_key = "_id")]
//! pub struct User {
//!     pub name: String,
//!     #[serde(rename = "years")]
//!     pub age: i32,
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmap_macros;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned, DeriveInput, LitStr};

#[proc_macro_derive(Model, attributes(model))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match generate(&input) {
        Ok(output) => output.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Debug, Default)]
struct ModelAttr {
    collection: Option<LitStr>,
    primary_key: Option<LitStr>,
    rename_all: Option<RenameRule>,
}

#[derive(Debug, Default)]
struct FieldAttr {
    rename: Option<LitStr>,
    skip: bool,
}

#[derive(Debug, Clone, Copy)]
enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
    ScreamingKebab,
}

impl RenameRule {
    fn from_lit(lit: &LitStr) -> syn::Result<Self> {
        Ok(match lit.value().as_str() {
            "lowercase" => RenameRule::Lower,
            "UPPERCASE" => RenameRule::Upper,
            "PascalCase" => RenameRule::Pascal,
            "camelCase" => RenameRule::Camel,
            "snake_case" => RenameRule::Snake,
            "SCREAMING_SNAKE_CASE" => RenameRule::ScreamingSnake,
            "kebab-case" => RenameRule::Kebab,
            "SCREAMING-KEBAB-CASE" => RenameRule::ScreamingKebab,
            _ => return Err(syn::Error::new_spanned(lit, "unknown rename_all rule")),
        })
    }

    /// Applies the rule to a snake_case field identifier, like serde does.
    fn apply(self, field: &str) -> String {
        match self {
            RenameRule::Lower | RenameRule::Snake => field.to_string(),
            RenameRule::Upper | RenameRule::ScreamingSnake => field.to_ascii_uppercase(),
            RenameRule::Kebab => field.replace('_', "-"),
            RenameRule::ScreamingKebab => field.to_ascii_uppercase().replace('_', "-"),
            RenameRule::Pascal | RenameRule::Camel => {
                let mut renamed = String::with_capacity(field.len());
                let mut capitalize = matches!(self, RenameRule::Pascal);

                for ch in field.chars() {
                    if ch == '_' {
                        capitalize = true;
                    } else if capitalize {
                        renamed.push(ch.to_ascii_uppercase());
                        capitalize = false;
                    } else {
                        renamed.push(ch);
                    }
                }

                renamed
            }
        }
    }
}

/// Consumes the value of a nested meta item we do not interpret, such as
/// `default = "path"` or `with(...)`.
fn skip_meta(meta: &syn::meta::ParseNestedMeta<'_>) -> syn::Result<()> {
    if meta.input.peek(syn::Token![=]) {
        meta.value()?.parse::<syn::Expr>()?;
    } else if meta.input.peek(syn::token::Paren) {
        let content;
        syn::parenthesized!(content in meta.input);
        content.parse::<TokenStream2>()?;
    }

    Ok(())
}

impl ModelAttr {
    fn from_ast(attrs: &[syn::Attribute]) -> syn::Result<Self> {
        let mut model_attr = ModelAttr::default();

        for attr in attrs {
            if attr.path().is_ident("model") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("collection") {
                        model_attr.collection = Some(meta.value()?.parse()?);
                    } else if meta.path.is_ident("primary_key") {
                        model_attr.primary_key = Some(meta.value()?.parse()?);
                    } else {
                        return Err(syn::Error::new_spanned(
                            &meta.path,
                            "expected `collection` or `primary_key`",
                        ));
                    }

                    Ok(())
                })?;
            } else if attr.path().is_ident("serde") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename_all") {
                        let lit: LitStr = meta.value()?.parse()?;
                        model_attr.rename_all = Some(RenameRule::from_lit(&lit)?);
                        Ok(())
                    } else {
                        skip_meta(&meta)
                    }
                })?;
            }
        }

        Ok(model_attr)
    }
}

impl FieldAttr {
    fn from_ast(attrs: &[syn::Attribute]) -> syn::Result<Self> {
        let mut field_attr = FieldAttr::default();

        for attr in attrs.iter().filter(|attr| attr.path().is_ident("serde")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") {
                    if meta.input.peek(syn::Token![=]) {
                        field_attr.rename = Some(meta.value()?.parse()?);
                    } else {
                        // rename(serialize = "...", deserialize = "...")
                        meta.parse_nested_meta(|inner| {
                            if inner.path.is_ident("serialize") {
                                field_attr.rename = Some(inner.value()?.parse()?);
                                Ok(())
                            } else {
                                skip_meta(&inner)
                            }
                        })?;
                    }
                } else if meta.path.is_ident("skip") || meta.path.is_ident("skip_serializing") {
                    field_attr.skip = true;
                } else if meta.path.is_ident("flatten") {
                    return Err(syn::Error::new_spanned(
                        &meta.path,
                        "flattened fields are not supported by #[derive(Model)]",
                    ));
                } else {
                    skip_meta(&meta)?;
                }

                Ok(())
            })?;
        }

        Ok(field_attr)
    }
}

fn generate(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let syn::Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(input.span(), "#[derive(Model)] only supports structs"));
    };

    let syn::Fields::Named(named) = &data.fields else {
        return Err(syn::Error::new_spanned(&data.fields, "model fields must be named"));
    };

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "model generics are not supported",
        ));
    }

    let ident = &input.ident;
    let model_name = ident.to_string();
    let model_attr = ModelAttr::from_ast(&input.attrs)?;

    let mut fields = Vec::new();
    let mut names = Vec::new();
    for field in &named.named {
        let field_attr = FieldAttr::from_ast(&field.attrs)?;
        if field_attr.skip {
            continue;
        }

        let Some(field_ident) = &field.ident else {
            return Err(syn::Error::new_spanned(field, "model fields must be named"));
        };

        let raw = field_ident.to_string();
        let raw = raw.strip_prefix("r#").unwrap_or(&raw);
        let name = match (&field_attr.rename, model_attr.rename_all) {
            (Some(rename), _) => rename.value(),
            (None, Some(rule)) => rule.apply(raw),
            (None, None) => raw.to_string(),
        };

        let ty = &field.ty;
        fields.push(quote! { .field::<#ty>(#name) });
        names.push(name);
    }

    if let Some(primary_key) = &model_attr.primary_key {
        let key = primary_key.value();
        if key != "_id" && !names.contains(&key) {
            return Err(syn::Error::new_spanned(
                primary_key,
                format!("primary key `{key}` is not a serialized field of {model_name}"),
            ));
        }
    }

    let collection = model_attr
        .collection
        .as_ref()
        .map(|collection| quote! { .collection(#collection) });
    let primary_key = model_attr
        .primary_key
        .as_ref()
        .map(|primary_key| quote! { .primary_key(#primary_key) });

    Ok(quote! {
        impl ::docmap::Model for #ident {
            fn schema() -> &'static ::docmap::schema::Schema {
                static SCHEMA: ::std::sync::OnceLock<::docmap::schema::Schema> = ::std::sync::OnceLock::new();

                SCHEMA.get_or_init(|| {
                    ::docmap::schema::Schema::builder(#model_name)
                        #collection
                        #primary_key
                        #(#fields)*
                        .build()
                })
            }
        }

        impl ::docmap::schema::SchemaType for #ident {
            fn field_type() -> ::docmap::schema::FieldType {
                ::docmap::schema::FieldType::Model(::docmap::schema::ModelRef::of::<#ident>())
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_rules_follow_serde() {
        assert_eq!(RenameRule::Camel.apply("created_at"), "createdAt");
        assert_eq!(RenameRule::Pascal.apply("created_at"), "CreatedAt");
        assert_eq!(RenameRule::ScreamingSnake.apply("created_at"), "CREATED_AT");
        assert_eq!(RenameRule::Kebab.apply("created_at"), "created-at");
    }

    #[test]
    fn serde_attributes_shape_the_schema() {
        let input: DeriveInput = syn::parse_quote! {
            #[serde(rename_all = "camelCase", deny_unknown_fields)]
            #[model(collection = "people")]
            struct User {
                first_name: String,
                #[serde(rename = "years", default)]
                age: i32,
                #[serde(skip)]
                cache: Vec<u8>,
                #[serde(skip_serializing_if = "Option::is_none", with = "something")]
                nick_name: Option<String>,
            }
        };

        let output = generate(&input).unwrap().to_string();

        assert!(output.contains("\"firstName\""));
        assert!(output.contains("\"years\""));
        assert!(output.contains("\"nickName\""));
        assert!(!output.contains("cache"));
        assert!(output.contains("\"people\""));
    }

    #[test]
    fn rejects_tuple_structs_and_generics() {
        let tuple: DeriveInput = syn::parse_quote! { struct Pair(i32, i32); };
        let generic: DeriveInput = syn::parse_quote! { struct Wrapper<T> { inner: T } };

        assert!(generate(&tuple).is_err());
        assert!(generate(&generic).is_err());
    }

    #[test]
    fn rejects_unknown_model_options() {
        let input: DeriveInput = syn::parse_quote! {
            #[model(table = "x")]
            struct User { name: String }
        };

        assert!(generate(&input).is_err());
    }

    #[test]
    fn primary_key_must_name_a_serialized_field() {
        let unknown: DeriveInput = syn::parse_quote! {
            #[model(primary_key = "uid")]
            struct Member { email: String }
        };
        let renamed: DeriveInput = syn::parse_quote! {
            #[serde(rename_all = "camelCase")]
            #[model(primary_key = "emailAddress")]
            struct Member { email_address: String }
        };

        assert!(generate(&unknown).is_err());
        assert!(generate(&renamed).unwrap().to_string().contains("\"emailAddress\""));
    }
}
