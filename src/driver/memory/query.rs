//! Filter, update and pipeline evaluation over BSON documents.
//!
//! Covers the query language subset the in-memory driver supports:
//! - filters: `$eq $ne $gt $gte $lt $lte $in $nin $exists $and $or $nor`
//! - updates: `$set $unset $inc $push $setOnInsert`
//! - pipeline: `$match $sort $skip $limit $project $count`

use std::cmp::Ordering;

use bson::{Bson, Document};

use crate::error::{AlbatrossError, AlbatrossResult};

/// Resolve a dotted path inside a document.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;

    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn set_path(doc: &mut Document, path: &str, value: Bson) -> AlbatrossResult<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(Document::new()));
            match child {
                Bson::Document(inner) => set_path(inner, rest, value),
                _ => Err(AlbatrossError::Operation(format!(
                    "Cannot create field '{}' in element {{{}: {}}}",
                    rest, head, child
                ))),
            }
        }
    }
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

pub fn values_equal(left: &Bson, right: &Bson) -> bool {
    match (as_f64(left), as_f64(right)) {
        (Some(a), Some(b)) => a == b,
        _ => match (left, right) {
            (Bson::Document(a), Bson::Document(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
            }
            (Bson::Array(a), Bson::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
            }
            _ => left == right,
        },
    }
}

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 0,
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) | Some(Bson::Double(_)) => 1,
        Some(Bson::String(_)) | Some(Bson::Symbol(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::Binary(_)) => 5,
        Some(Bson::ObjectId(_)) => 6,
        Some(Bson::Boolean(_)) => 7,
        Some(Bson::DateTime(_)) => 8,
        Some(Bson::Timestamp(_)) => 9,
        Some(_) => 10,
    }
}

/// Ordering between two values of the same type class, if they have one.
fn compare_same_class(left: &Bson, right: &Bson) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) {
        return a.partial_cmp(&b);
    }

    match (left, right) {
        (Bson::String(a), Bson::String(b)) => Some(a.cmp(b)),
        (Bson::ObjectId(a), Bson::ObjectId(b)) => Some(a.cmp(b)),
        (Bson::Boolean(a), Bson::Boolean(b)) => Some(a.cmp(b)),
        (Bson::DateTime(a), Bson::DateTime(b)) => Some(a.cmp(b)),
        (Bson::Timestamp(a), Bson::Timestamp(b)) => Some((a.time, a.increment).cmp(&(b.time, b.increment))),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total order used for sorting: type class first, then value.
pub fn compare_values(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let by_rank = type_rank(left).cmp(&type_rank(right));
    if by_rank != Ordering::Equal {
        return by_rank;
    }

    match (left, right) {
        (Some(a), Some(b)) => compare_same_class(a, b).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

fn is_operator_document(value: &Bson) -> bool {
    match value {
        Bson::Document(doc) => doc.keys().next().is_some_and(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Whether `doc` satisfies `filter`.
pub fn matches(doc: &Document, filter: &Document) -> AlbatrossResult<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => clauses(condition)?
                .iter()
                .try_fold(true, |acc, clause| Ok::<_, AlbatrossError>(acc && matches(doc, clause)?))?,
            "$or" => {
                let mut any = false;
                for clause in clauses(condition)? {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(condition)? {
                    if matches(doc, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(AlbatrossError::Operation(format!(
                    "unknown top level operator: {}",
                    op
                )))
            }
            path => matches_condition(get_path(doc, path), condition)?,
        };

        if !ok {
            return Ok(false);
        }
    }

    Ok(true)
}

fn clauses(condition: &Bson) -> AlbatrossResult<Vec<&Document>> {
    let items = match condition {
        Bson::Array(items) if !items.is_empty() => items,
        _ => {
            return Err(AlbatrossError::Operation(
                "$and/$or/$nor must be a nonempty array".to_string(),
            ))
        }
    };

    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            _ => Err(AlbatrossError::Operation(
                "$and/$or/$nor entries need to be full objects".to_string(),
            )),
        })
        .collect()
}

fn equals_condition(value: Option<&Bson>, expected: &Bson) -> bool {
    match (value, expected) {
        (None, Bson::Null) => true,
        (None, _) => false,
        (Some(Bson::Array(items)), _) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        (Some(actual), _) => values_equal(actual, expected),
    }
}

fn ordered_condition(value: Option<&Bson>, bound: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let check = |actual: &Bson| compare_same_class(actual, bound).is_some_and(accept);

    match value {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(check),
        Some(actual) => check(actual),
    }
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> AlbatrossResult<bool> {
    let operators = match condition {
        Bson::Document(ops) if is_operator_document(condition) => ops,
        _ => return Ok(equals_condition(value, condition)),
    };

    for (op, operand) in operators {
        let ok = match op.as_str() {
            "$eq" => equals_condition(value, operand),
            "$ne" => !equals_condition(value, operand),
            "$gt" => ordered_condition(value, operand, |o| o == Ordering::Greater),
            "$gte" => ordered_condition(value, operand, |o| o != Ordering::Less),
            "$lt" => ordered_condition(value, operand, |o| o == Ordering::Less),
            "$lte" => ordered_condition(value, operand, |o| o != Ordering::Greater),
            "$in" | "$nin" => {
                let candidates = match operand {
                    Bson::Array(items) => items,
                    _ => {
                        return Err(AlbatrossError::Operation(format!("{} needs an array", op)))
                    }
                };
                let found = candidates.iter().any(|c| equals_condition(value, c));
                if op == "$in" {
                    found
                } else {
                    !found
                }
            }
            "$exists" => {
                let wanted = !matches!(operand, Bson::Boolean(false) | Bson::Int32(0) | Bson::Int64(0));
                value.is_some() == wanted
            }
            other => {
                return Err(AlbatrossError::Operation(format!(
                    "unknown operator: {}",
                    other
                )))
            }
        };

        if !ok {
            return Ok(false);
        }
    }

    Ok(true)
}

fn is_operator_update(update: &Document) -> bool {
    update.keys().next().is_some_and(|k| k.starts_with('$'))
}

/// Apply an update document to `doc`. `inserting` enables `$setOnInsert`.
pub fn apply_update(doc: &mut Document, update: &Document, inserting: bool) -> AlbatrossResult<()> {
    let id = doc.get("_id").cloned();

    if !is_operator_update(update) {
        return Err(AlbatrossError::Operation(
            "update document must have first key starting with '$'".to_string(),
        ));
    }

    for (op, fields) in update {
        let fields = match fields {
            Bson::Document(fields) => fields,
            _ => {
                return Err(AlbatrossError::Operation(format!(
                    "Modifiers operate on fields but we found another type instead for {}",
                    op
                )))
            }
        };

        for (path, value) in fields {
            match op.as_str() {
                "$set" => set_path(doc, path, value.clone())?,
                "$setOnInsert" => {
                    if inserting {
                        set_path(doc, path, value.clone())?
                    }
                }
                "$unset" => unset_path(doc, path),
                "$inc" => {
                    let next = match get_path(doc, path) {
                        None => value.clone(),
                        Some(current) => add_numbers(current, value).ok_or_else(|| {
                            AlbatrossError::Operation(format!(
                                "Cannot apply $inc to a value of non-numeric type at '{}'",
                                path
                            ))
                        })?,
                    };
                    set_path(doc, path, next)?
                }
                "$push" => {
                    let mut items = match get_path(doc, path) {
                        None => Vec::new(),
                        Some(Bson::Array(items)) => items.clone(),
                        Some(_) => {
                            return Err(AlbatrossError::Operation(format!(
                                "The field '{}' must be an array",
                                path
                            )))
                        }
                    };
                    items.push(value.clone());
                    set_path(doc, path, Bson::Array(items))?
                }
                other => {
                    return Err(AlbatrossError::Operation(format!(
                        "Unknown modifier: {}",
                        other
                    )))
                }
            }
        }
    }

    if doc.get("_id") != id.as_ref() && id.is_some() {
        return Err(AlbatrossError::Operation(
            "Performing an update on the path '_id' would modify the immutable field '_id'"
                .to_string(),
        ));
    }

    Ok(())
}

fn add_numbers(current: &Bson, delta: &Bson) -> Option<Bson> {
    match (current, delta) {
        (Bson::Int32(a), Bson::Int32(b)) => Some(
            a.checked_add(*b)
                .map(Bson::Int32)
                .unwrap_or(Bson::Int64(*a as i64 + *b as i64)),
        ),
        (Bson::Int32(a), Bson::Int64(b)) => Some(Bson::Int64(*a as i64 + b)),
        (Bson::Int64(a), Bson::Int32(b)) => Some(Bson::Int64(a + *b as i64)),
        (Bson::Int64(a), Bson::Int64(b)) => Some(Bson::Int64(a + b)),
        _ => Some(Bson::Double(as_f64(current)? + as_f64(delta)?)),
    }
}

/// Fields an upsert starts from: the plain equality clauses of the filter.
pub fn upsert_seed(filter: &Document) -> AlbatrossResult<Document> {
    let mut seed = Document::new();

    for (key, value) in filter {
        if key.starts_with('$') || is_operator_document(value) {
            continue;
        }
        set_path(&mut seed, key, value.clone())?;
    }

    Ok(seed)
}

/// Order two documents by a `{field: 1 | -1}` sort specification.
pub fn compare_by(left: &Document, right: &Document, sort: &Document) -> Ordering {
    for (path, direction) in sort {
        let ordering = compare_values(get_path(left, path), get_path(right, path));
        let descending = as_f64(direction).is_some_and(|d| d < 0.0);
        let ordering = if descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

pub fn sort_documents(docs: &mut [Document], sort: &Document) {
    docs.sort_by(|a, b| compare_by(a, b, sort));
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => as_f64(other).map_or(true, |n| n != 0.0),
    }
}

/// Apply an inclusion or exclusion projection.
pub fn project(doc: &Document, projection: &Document) -> AlbatrossResult<Document> {
    let keep_id = projection.get("_id").map_or(true, truthy);
    let inclusive = projection
        .iter()
        .any(|(key, value)| key != "_id" && truthy(value));

    if inclusive {
        let mut projected = Document::new();
        if keep_id {
            if let Some(id) = doc.get("_id") {
                projected.insert("_id", id.clone());
            }
        }
        for (path, value) in projection {
            if path == "_id" || !truthy(value) {
                continue;
            }
            if let Some(found) = get_path(doc, path) {
                set_path(&mut projected, path, found.clone())?;
            }
        }
        return Ok(projected);
    }

    let mut projected = doc.clone();
    for (path, _) in projection.iter().filter(|(_, value)| !truthy(value)) {
        unset_path(&mut projected, path);
    }
    if !keep_id {
        projected.remove("_id");
    }
    Ok(projected)
}

fn stage_count(value: &Bson, stage: &str) -> AlbatrossResult<usize> {
    match as_f64(value) {
        Some(n) if n >= 0.0 => Ok(n as usize),
        _ => Err(AlbatrossError::Operation(format!(
            "{} requires a non-negative number",
            stage
        ))),
    }
}

/// Run an aggregation pipeline over `docs`.
pub fn run_pipeline(mut docs: Vec<Document>, pipeline: &[Document]) -> AlbatrossResult<Vec<Document>> {
    for stage in pipeline {
        let (name, spec) = match stage.iter().next() {
            Some(entry) if stage.len() == 1 => entry,
            _ => {
                return Err(AlbatrossError::Operation(
                    "A pipeline stage specification object must contain exactly one field"
                        .to_string(),
                ))
            }
        };

        docs = match (name.as_str(), spec) {
            ("$match", Bson::Document(filter)) => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            ("$sort", Bson::Document(sort)) => {
                sort_documents(&mut docs, sort);
                docs
            }
            ("$skip", value) => docs.into_iter().skip(stage_count(value, "$skip")?).collect(),
            ("$limit", value) => docs.into_iter().take(stage_count(value, "$limit")?).collect(),
            ("$project", Bson::Document(projection)) => docs
                .iter()
                .map(|doc| project(doc, projection))
                .collect::<AlbatrossResult<_>>()?,
            ("$count", Bson::String(field)) => {
                if docs.is_empty() {
                    Vec::new()
                } else {
                    let mut counted = Document::new();
                    counted.insert(field.clone(), docs.len() as i32);
                    vec![counted]
                }
            }
            (other, _) => {
                return Err(AlbatrossError::Operation(format!(
                    "Unrecognized pipeline stage name: '{}'",
                    other
                )))
            }
        };
    }

    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_get_path_nested() {
        let doc = doc! { "a": { "b": { "c": 5 } }, "list": [10, 20] };
        assert_eq!(get_path(&doc, "a.b.c"), Some(&Bson::Int32(5)));
        assert_eq!(get_path(&doc, "list.1"), Some(&Bson::Int32(20)));
        assert_eq!(get_path(&doc, "a.x"), None);
    }

    #[test]
    fn test_null_matches_missing() {
        let doc = doc! { "foo": "bar" };
        assert!(matches(&doc, &doc! { "test": Bson::Null }).unwrap());
        assert!(!matches(&doc! { "test": 1 }, &doc! { "test": Bson::Null }).unwrap());
    }

    #[test]
    fn test_numeric_equality_across_types() {
        let doc = doc! { "n": 3_i64 };
        assert!(matches(&doc, &doc! { "n": 3 }).unwrap());
        assert!(matches(&doc, &doc! { "n": 3.0 }).unwrap());
    }

    #[test]
    fn test_comparison_operators() {
        let doc = doc! { "born": 1992 };
        assert!(matches(&doc, &doc! { "born": { "$gt": 1990, "$lte": 1992 } }).unwrap());
        assert!(!matches(&doc, &doc! { "born": { "$lt": 1990 } }).unwrap());
        assert!(!matches(&doc, &doc! { "born": { "$gt": "1990" } }).unwrap());
    }

    #[test]
    fn test_array_membership() {
        let doc = doc! { "tags": ["a", "b"] };
        assert!(matches(&doc, &doc! { "tags": "b" }).unwrap());
        assert!(matches(&doc, &doc! { "tags": { "$in": ["x", "a"] } }).unwrap());
        assert!(matches(&doc, &doc! { "tags": { "$nin": ["x"] } }).unwrap());
    }

    #[test]
    fn test_logical_operators() {
        let doc = doc! { "a": 1, "b": 2 };
        assert!(matches(&doc, &doc! { "$or": [{ "a": 5 }, { "b": 2 }] }).unwrap());
        assert!(!matches(&doc, &doc! { "$and": [{ "a": 1 }, { "b": 3 }] }).unwrap());
        assert!(matches(&doc, &doc! { "$nor": [{ "a": 5 }] }).unwrap());
        assert!(matches(&doc, &doc! { "$or": [] }).is_err());
    }

    #[test]
    fn test_exists() {
        let doc = doc! { "a": Bson::Null };
        assert!(matches(&doc, &doc! { "a": { "$exists": true } }).unwrap());
        assert!(matches(&doc, &doc! { "b": { "$exists": false } }).unwrap());
    }

    #[test]
    fn test_unknown_operator_is_an_error() {
        assert!(matches(&doc! {}, &doc! { "a": { "$regex": "x" } }).is_err());
    }

    #[test]
    fn test_update_operators() {
        let mut doc = doc! { "_id": 1, "a": 1, "b": 2, "n": 5 };
        apply_update(
            &mut doc,
            &doc! {
                "$set": { "b": Bson::Null, "nested.x": 1 },
                "$unset": { "a": "" },
                "$inc": { "n": 2, "fresh": 1 },
                "$push": { "list": "v" },
            },
            false,
        )
        .unwrap();

        assert_eq!(
            doc,
            doc! { "_id": 1, "b": Bson::Null, "n": 7, "nested": { "x": 1 }, "fresh": 1, "list": ["v"] }
        );
    }

    #[test]
    fn test_replacement_document_is_rejected() {
        let mut doc = doc! { "_id": 7, "a": 1 };
        assert!(apply_update(&mut doc, &doc! { "b": 2 }, false).is_err());
        assert_eq!(doc, doc! { "_id": 7, "a": 1 });
    }

    #[test]
    fn test_set_on_insert_only_when_inserting() {
        let mut doc = doc! { "_id": 1 };
        apply_update(&mut doc, &doc! { "$setOnInsert": { "created": true } }, false).unwrap();
        assert!(!doc.contains_key("created"));
        apply_update(&mut doc, &doc! { "$setOnInsert": { "created": true } }, true).unwrap();
        assert!(doc.contains_key("created"));
    }

    #[test]
    fn test_id_is_immutable() {
        let mut doc = doc! { "_id": 1 };
        assert!(apply_update(&mut doc, &doc! { "$set": { "_id": 2 } }, false).is_err());
    }

    #[test]
    fn test_upsert_seed_takes_equality_fields() {
        let seed = upsert_seed(&doc! { "name": "x", "age": { "$gt": 3 }, "$or": [{ "a": 1 }] }).unwrap();
        assert_eq!(seed, doc! { "name": "x" });
    }

    #[test]
    fn test_sort_and_project() {
        let mut docs = vec![
            doc! { "_id": 1, "n": 2, "s": "b" },
            doc! { "_id": 2, "n": 1, "s": "a" },
            doc! { "_id": 3, "s": "c" },
        ];
        sort_documents(&mut docs, &doc! { "n": -1 });
        let order: Vec<_> = docs.iter().map(|d| d.get_i32("_id").unwrap()).collect();
        assert_eq!(order, vec![1, 2, 3]);

        let projected = project(&docs[0], &doc! { "s": 1, "_id": 0 }).unwrap();
        assert_eq!(projected, doc! { "s": "b" });

        let projected = project(&docs[0], &doc! { "s": 0 }).unwrap();
        assert_eq!(projected, doc! { "_id": 1, "n": 2 });
    }

    #[test]
    fn test_pipeline() {
        let docs = vec![
            doc! { "_id": 1, "kind": "a", "n": 3 },
            doc! { "_id": 2, "kind": "b", "n": 1 },
            doc! { "_id": 3, "kind": "a", "n": 2 },
        ];
        let out = run_pipeline(
            docs.clone(),
            &[
                doc! { "$match": { "kind": "a" } },
                doc! { "$sort": { "n": 1 } },
                doc! { "$limit": 1 },
                doc! { "$project": { "n": 1 } },
            ],
        )
        .unwrap();
        assert_eq!(out, vec![doc! { "_id": 3, "n": 2 }]);

        let counted = run_pipeline(docs, &[doc! { "$count": "total" }]).unwrap();
        assert_eq!(counted, vec![doc! { "total": 3 }]);

        assert!(run_pipeline(vec![], &[doc! { "$group": {} }]).is_err());
    }
}
