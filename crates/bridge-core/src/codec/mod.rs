//! Codec - reversible serialization of values beyond JSON's type set.
//!
//! [`encode`] splits a [`Value`] into plain JSON plus a [`SidecarMeta`] describing how to
//! rebuild the nodes JSON cannot represent. [`decode`] is its inverse:
//!
//! ```
//! use bridge_core::codec::{self, Value};
//! use chrono::{TimeZone, Utc};
//!
//! let created = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
//! let value = Value::object([("id", Value::from(1)), ("createdAt", Value::from(created))]);
//!
//! let encoded = codec::encode(&value).unwrap();
//! assert_eq!(encoded.json["createdAt"], "2020-01-01T00:00:00.000Z");
//!
//! let decoded = codec::decode(&encoded.json, encoded.meta.as_ref()).unwrap();
//! assert_eq!(decoded, value);
//! ```
//!
//! # Sidecar format
//!
//! The sidecar is `{"values": tree}` where a tree node is one of:
//!
//! - `["Date"]`: the node itself carries an annotation
//! - `["map", {"0": ...}]`: an annotation plus annotated children
//! - `{"key": ...}`: only children carry annotations
//!
//! Children are keyed by object key or by array index. Map entries are encoded as `[key, value]`
//! pairs, so a date used as a map value sits at `{"<entry>": {"1": ["Date"]}}`.

pub mod date;
mod de;
mod ser;
mod value;

pub use value::{ErrorValue, Value, MAX_SAFE_INTEGER};

use crate::error::CodecError;
use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Value as Json};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Type annotations understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeAnnotation {
    Undefined,
    Number,
    BigInt,
    Date,
    Map,
    Set,
    Error,
}

impl TypeAnnotation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeAnnotation::Undefined => "undefined",
            TypeAnnotation::Number => "number",
            TypeAnnotation::BigInt => "bigint",
            TypeAnnotation::Date => "Date",
            TypeAnnotation::Map => "map",
            TypeAnnotation::Set => "set",
            TypeAnnotation::Error => "Error",
        }
    }
}

impl fmt::Display for TypeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeAnnotation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "undefined" => Ok(TypeAnnotation::Undefined),
            "number" => Ok(TypeAnnotation::Number),
            "bigint" => Ok(TypeAnnotation::BigInt),
            "Date" => Ok(TypeAnnotation::Date),
            "map" => Ok(TypeAnnotation::Map),
            "set" => Ok(TypeAnnotation::Set),
            "Error" => Ok(TypeAnnotation::Error),
            other => Err(other.to_string()),
        }
    }
}

/// Annotations for one node and its descendants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationTree {
    pub annotation: Option<TypeAnnotation>,
    pub children: BTreeMap<String, AnnotationTree>,
}

impl AnnotationTree {
    pub fn is_empty(&self) -> bool {
        self.annotation.is_none() && self.children.is_empty()
    }

    fn children_json(&self) -> Json {
        Json::Object(
            self.children
                .iter()
                .map(|(key, child)| (key.clone(), child.to_json()))
                .collect(),
        )
    }

    fn to_json(&self) -> Json {
        match (self.annotation, self.children.is_empty()) {
            (Some(annotation), true) => Json::Array(vec![Json::from(annotation.as_str())]),
            (Some(annotation), false) => {
                Json::Array(vec![Json::from(annotation.as_str()), self.children_json()])
            }
            (None, _) => self.children_json(),
        }
    }

    fn from_json(json: &Json, path: &mut Vec<String>) -> Result<Self, CodecError> {
        let bad = |path: &[String], message: &str| CodecError::Malformed {
            path: render_path(path),
            annotation: "meta".to_string(),
            message: message.to_string(),
        };

        match json {
            Json::Array(parts) => {
                let (head, rest) = parts
                    .split_first()
                    .ok_or_else(|| bad(path.as_slice(), "empty annotation"))?;
                let name = head
                    .as_str()
                    .ok_or_else(|| bad(path.as_slice(), "annotation must be a string"))?;
                let annotation = TypeAnnotation::from_str(name).map_err(|annotation| {
                    CodecError::UnknownAnnotation {
                        path: render_path(path),
                        annotation,
                    }
                })?;
                let children = match rest {
                    [] => BTreeMap::new(),
                    [Json::Object(children)] => Self::children_from_json(children, path)?,
                    _ => return Err(bad(path.as_slice(), "unexpected annotation payload")),
                };
                Ok(Self {
                    annotation: Some(annotation),
                    children,
                })
            }
            Json::Object(children) => Ok(Self {
                annotation: None,
                children: Self::children_from_json(children, path)?,
            }),
            _ => Err(bad(path.as_slice(), "expected an array or an object")),
        }
    }

    fn children_from_json(
        children: &JsonMap<String, Json>,
        path: &mut Vec<String>,
    ) -> Result<BTreeMap<String, AnnotationTree>, CodecError> {
        let mut out = BTreeMap::new();
        for (key, child) in children {
            path.push(key.clone());
            let tree = Self::from_json(child, path)?;
            path.pop();
            out.insert(key.clone(), tree);
        }
        Ok(out)
    }
}

/// Reconstruction metadata travelling next to plain JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SidecarMeta {
    pub values: AnnotationTree,
}

impl SidecarMeta {
    pub fn to_json(&self) -> Json {
        let mut map = JsonMap::new();
        map.insert("values".to_string(), self.values.to_json());
        Json::Object(map)
    }

    /// Parse a sidecar received from the wire.
    pub fn from_json(json: &Json) -> Result<Self, CodecError> {
        let values = json
            .get("values")
            .ok_or_else(|| CodecError::Malformed {
                path: String::new(),
                annotation: "meta".to_string(),
                message: "sidecar is missing `values`".to_string(),
            })?;
        Ok(Self {
            values: AnnotationTree::from_json(values, &mut Vec::new())?,
        })
    }
}

impl Serialize for SidecarMeta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SidecarMeta {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        SidecarMeta::from_json(&json).map_err(serde::de::Error::custom)
    }
}

/// A value split into plain JSON and its optional sidecar.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedValue {
    pub json: Json,
    pub meta: Option<SidecarMeta>,
}

/// Encode a value into JSON plus sidecar.
pub fn encode(value: &Value) -> Result<SerializedValue, CodecError> {
    let mut tree = AnnotationTree::default();
    let json = encode_node(value, &mut tree, &mut Vec::new())?;
    let meta = (!tree.is_empty()).then_some(SidecarMeta { values: tree });
    Ok(SerializedValue { json, meta })
}

/// Decode JSON plus optional sidecar back into a value.
pub fn decode(json: &Json, meta: Option<&SidecarMeta>) -> Result<Value, CodecError> {
    decode_node(json, meta.map(|m| &m.values), &mut Vec::new())
}

/// Decode when the sidecar is still raw JSON, as it is inside a request.
pub fn decode_with_raw_meta(json: &Json, meta: Option<&Json>) -> Result<Value, CodecError> {
    let meta = match meta {
        None | Some(Json::Null) => None,
        Some(raw) => Some(SidecarMeta::from_json(raw)?),
    };
    decode(json, meta.as_ref())
}

fn render_path(path: &[String]) -> String {
    path.join(".")
}

fn encode_number(n: f64) -> Option<&'static str> {
    if n.is_nan() {
        Some("NaN")
    } else if n == f64::INFINITY {
        Some("Infinity")
    } else if n == f64::NEG_INFINITY {
        Some("-Infinity")
    } else if n == 0.0 && n.is_sign_negative() {
        Some("-0")
    } else {
        None
    }
}

fn finite_number_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER as f64 {
        Json::from(n as i64)
    } else {
        // Finite by construction, so from_f64 cannot fail here.
        serde_json::Number::from_f64(n)
            .map(Json::Number)
            .unwrap_or(Json::Null)
    }
}

fn encode_date(date: &DateTime<Utc>, path: &[String]) -> Result<Json, CodecError> {
    if !(0..=9999).contains(&date.year()) {
        return Err(CodecError::Unsupported(format!(
            "date {date} at path {:?} is outside years 0..=9999",
            render_path(path)
        )));
    }
    if date.timestamp_subsec_nanos() % 1_000_000 != 0 {
        return Err(CodecError::Unsupported(format!(
            "date {date} at path {:?} has sub-millisecond precision",
            render_path(path)
        )));
    }
    Ok(Json::String(date.to_rfc3339_opts(SecondsFormat::Millis, true)))
}

fn child<'a>(tree: &'a mut AnnotationTree, key: String) -> &'a mut AnnotationTree {
    tree.children.entry(key).or_default()
}

fn prune(tree: &mut AnnotationTree) {
    tree.children.retain(|_, child| !child.is_empty());
}

fn encode_node(
    value: &Value,
    tree: &mut AnnotationTree,
    path: &mut Vec<String>,
) -> Result<Json, CodecError> {
    let json = match value {
        Value::Undefined => {
            tree.annotation = Some(TypeAnnotation::Undefined);
            Json::Null
        }
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => match encode_number(*n) {
            Some(text) => {
                tree.annotation = Some(TypeAnnotation::Number);
                Json::from(text)
            }
            None => finite_number_json(*n),
        },
        Value::BigInt(i) => {
            tree.annotation = Some(TypeAnnotation::BigInt);
            Json::String(i.to_string())
        }
        Value::String(s) => Json::String(s.clone()),
        Value::Date(d) => {
            tree.annotation = Some(TypeAnnotation::Date);
            encode_date(d, path)?
        }
        Value::Array(items) => Json::Array(encode_items(items, tree, path)?),
        Value::Set(items) => {
            tree.annotation = Some(TypeAnnotation::Set);
            Json::Array(encode_items(items, tree, path)?)
        }
        Value::Object(map) => {
            let mut out = JsonMap::new();
            for (key, item) in map {
                path.push(key.clone());
                let encoded = encode_node(item, child(tree, key.clone()), path)?;
                path.pop();
                out.insert(key.clone(), encoded);
            }
            Json::Object(out)
        }
        Value::Map(entries) => {
            tree.annotation = Some(TypeAnnotation::Map);
            let mut out = Vec::with_capacity(entries.len());
            for (index, (key, item)) in entries.iter().enumerate() {
                let entry_tree = child(tree, index.to_string());
                path.push(index.to_string());

                path.push("0".to_string());
                let key_json = encode_node(key, child(entry_tree, "0".to_string()), path)?;
                path.pop();

                path.push("1".to_string());
                let item_json = encode_node(item, child(entry_tree, "1".to_string()), path)?;
                path.pop();

                path.pop();
                prune(entry_tree);
                out.push(Json::Array(vec![key_json, item_json]));
            }
            Json::Array(out)
        }
        Value::Error(err) => {
            tree.annotation = Some(TypeAnnotation::Error);
            let mut out = JsonMap::new();
            out.insert("name".to_string(), Json::String(err.name.clone()));
            out.insert("message".to_string(), Json::String(err.message.clone()));
            if let Some(stack) = &err.stack {
                out.insert("stack".to_string(), Json::String(stack.clone()));
            }
            for (key, item) in &err.fields {
                if RESERVED_ERROR_KEYS.contains(&key.as_str()) {
                    return Err(CodecError::Unsupported(format!(
                        "error field `{key}` at path {:?} shadows a reserved key",
                        render_path(path)
                    )));
                }
                path.push(key.clone());
                let encoded = encode_node(item, child(tree, key.clone()), path)?;
                path.pop();
                out.insert(key.clone(), encoded);
            }
            Json::Object(out)
        }
    };
    prune(tree);
    Ok(json)
}

/// Keys an encoded error uses for its own properties, never available to custom fields.
const RESERVED_ERROR_KEYS: [&str; 3] = ["name", "message", "stack"];

fn encode_items(
    items: &[Value],
    tree: &mut AnnotationTree,
    path: &mut Vec<String>,
) -> Result<Vec<Json>, CodecError> {
    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        path.push(index.to_string());
        out.push(encode_node(item, child(tree, index.to_string()), path)?);
        path.pop();
    }
    Ok(out)
}

fn malformed(path: &[String], annotation: TypeAnnotation, message: impl Into<String>) -> CodecError {
    CodecError::Malformed {
        path: render_path(path),
        annotation: annotation.to_string(),
        message: message.into(),
    }
}

/// Fails when the tree annotates children that the JSON node does not have.
fn check_children(
    tree: Option<&AnnotationTree>,
    exists: impl Fn(&str) -> bool,
    path: &[String],
) -> Result<(), CodecError> {
    if let Some(tree) = tree {
        if let Some(key) = tree.children.keys().find(|key| !exists(key)) {
            let mut dangling = path.to_vec();
            dangling.push(key.clone());
            return Err(CodecError::DanglingPath(render_path(&dangling)));
        }
    }
    Ok(())
}

fn child_tree<'a>(tree: Option<&'a AnnotationTree>, key: &str) -> Option<&'a AnnotationTree> {
    tree.and_then(|t| t.children.get(key))
}

fn index_exists(len: usize) -> impl Fn(&str) -> bool {
    move |key| key.parse::<usize>().map(|i| i < len).unwrap_or(false)
}

fn decode_items(
    items: &[Json],
    tree: Option<&AnnotationTree>,
    path: &mut Vec<String>,
) -> Result<Vec<Value>, CodecError> {
    check_children(tree, index_exists(items.len()), path)?;
    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let key = index.to_string();
        path.push(key.clone());
        out.push(decode_node(item, child_tree(tree, &key), path)?);
        path.pop();
    }
    Ok(out)
}

fn decode_object(
    map: &JsonMap<String, Json>,
    tree: Option<&AnnotationTree>,
    path: &mut Vec<String>,
) -> Result<BTreeMap<String, Value>, CodecError> {
    check_children(tree, |key| map.contains_key(key), path)?;
    let mut out = BTreeMap::new();
    for (key, item) in map {
        path.push(key.clone());
        out.insert(key.clone(), decode_node(item, child_tree(tree, key), path)?);
        path.pop();
    }
    Ok(out)
}

fn decode_node(
    json: &Json,
    tree: Option<&AnnotationTree>,
    path: &mut Vec<String>,
) -> Result<Value, CodecError> {
    let Some(annotation) = tree.and_then(|t| t.annotation) else {
        return decode_plain(json, tree, path);
    };

    match annotation {
        TypeAnnotation::Undefined => {
            check_children(tree, |_| false, path)?;
            match json {
                Json::Null => Ok(Value::Undefined),
                _ => Err(malformed(path, annotation, "expected null")),
            }
        }
        TypeAnnotation::Number => {
            check_children(tree, |_| false, path)?;
            match json.as_str() {
                Some("NaN") => Ok(Value::Number(f64::NAN)),
                Some("Infinity") => Ok(Value::Number(f64::INFINITY)),
                Some("-Infinity") => Ok(Value::Number(f64::NEG_INFINITY)),
                Some("-0") => Ok(Value::Number(-0.0)),
                _ => Err(malformed(path, annotation, format!("unexpected {json}"))),
            }
        }
        TypeAnnotation::BigInt => {
            check_children(tree, |_| false, path)?;
            json.as_str()
                .and_then(|s| s.parse::<i128>().ok())
                .map(Value::BigInt)
                .ok_or_else(|| malformed(path, annotation, format!("unexpected {json}")))
        }
        TypeAnnotation::Date => {
            check_children(tree, |_| false, path)?;
            let text = json
                .as_str()
                .ok_or_else(|| malformed(path, annotation, "expected a string"))?;
            DateTime::parse_from_rfc3339(text)
                .map(|d| Value::Date(d.with_timezone(&Utc)))
                .map_err(|e| malformed(path, annotation, e.to_string()))
        }
        TypeAnnotation::Set => match json {
            Json::Array(items) => Ok(Value::Set(decode_items(items, tree, path)?)),
            _ => Err(malformed(path, annotation, "expected an array")),
        },
        TypeAnnotation::Map => {
            let Json::Array(entries) = json else {
                return Err(malformed(path, annotation, "expected an array of pairs"));
            };
            check_children(tree, index_exists(entries.len()), path)?;
            let mut out = Vec::with_capacity(entries.len());
            for (index, entry) in entries.iter().enumerate() {
                let key = index.to_string();
                path.push(key.clone());
                let pair = match entry {
                    Json::Array(pair) if pair.len() == 2 => pair,
                    _ => return Err(malformed(path, annotation, "expected a [key, value] pair")),
                };
                let entry_tree = child_tree(tree, &key);
                check_children(entry_tree, |k| k == "0" || k == "1", path)?;

                path.push("0".to_string());
                let k = decode_node(&pair[0], child_tree(entry_tree, "0"), path)?;
                path.pop();
                path.push("1".to_string());
                let v = decode_node(&pair[1], child_tree(entry_tree, "1"), path)?;
                path.pop();

                path.pop();
                out.push((k, v));
            }
            Ok(Value::Map(out))
        }
        TypeAnnotation::Error => {
            let Json::Object(map) = json else {
                return Err(malformed(path, annotation, "expected an object"));
            };
            let mut fields = decode_object(map, tree, path)?;
            let name = match fields.remove("name") {
                None => "Error".to_string(),
                Some(Value::String(s)) => s,
                Some(_) => return Err(malformed(path, annotation, "`name` must be a string")),
            };
            let message = match fields.remove("message") {
                None => String::new(),
                Some(Value::String(s)) => s,
                Some(_) => return Err(malformed(path, annotation, "`message` must be a string")),
            };
            let stack = match fields.remove("stack") {
                None => None,
                Some(Value::String(s)) => Some(s),
                Some(_) => return Err(malformed(path, annotation, "`stack` must be a string")),
            };
            Ok(Value::Error(Box::new(ErrorValue {
                name,
                message,
                stack,
                fields,
            })))
        }
    }
}

fn decode_plain(
    json: &Json,
    tree: Option<&AnnotationTree>,
    path: &mut Vec<String>,
) -> Result<Value, CodecError> {
    match json {
        Json::Array(items) => Ok(Value::Array(decode_items(items, tree, path)?)),
        Json::Object(map) => Ok(Value::Object(decode_object(map, tree, path)?)),
        scalar => {
            check_children(tree, |_| false, path)?;
            Ok(Value::from(scalar.clone()))
        }
    }
}
