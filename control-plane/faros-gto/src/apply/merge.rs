//! Structured three-way diff between the desired document, the last-applied
//! record and the live object.
//!
//! Every leaf field of the three documents is tagged with who owns it:
//!
//! - `Controller`: declared by the desired document. Live must match it.
//! - `Removed`: recorded as last applied but no longer desired. Deleted from
//!   live when still present.
//! - `External`: only present on the live object. Never touched.
//!
//! Objects are walked key by key; arrays and scalars are leaves. A leaf that
//! needs patching is sent whole, which matches JSON merge patch semantics.

use std::fmt;

use serde_json::{Map, Value};

use super::LAST_APPLIED_ANNOTATION;

/// Server-populated metadata that never takes part in the comparison.
const VOLATILE_METADATA: &[&str] = &[
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
    "managedFields",
    "selfLink",
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, seg: &str) -> Self {
        let mut segs = self.0.clone();
        segs.push(seg.to_string());
        Self(segs)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// True when either path contains the other.
    pub fn overlaps(&self, other: &FieldPath) -> bool {
        let n = self.0.len().min(other.0.len());
        self.0[..n] == other.0[..n]
    }
}

impl From<&[&str]> for FieldPath {
    fn from(segs: &[&str]) -> Self {
        Self(segs.iter().map(|s| s.to_string()).collect())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    Controller,
    Removed,
    External,
}

/// How a controller-owned field moved relative to the last-applied record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drift {
    Unchanged,
    DesiredChanged,
    LiveChanged,
    BothChanged,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldEntry {
    pub path: FieldPath,
    pub ownership: Ownership,
    /// Only set for controller-owned fields.
    pub drift: Option<Drift>,
    pub needs_patch: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldSet {
    entries: Vec<FieldEntry>,
}

enum Lookup<'a> {
    Missing,
    Found(&'a Value),
    /// A non-object value sits on a prefix of the path.
    Covered,
}

fn lookup<'a>(doc: &'a Value, path: &FieldPath) -> Lookup<'a> {
    let mut cur = doc;
    for seg in path.segments() {
        match cur {
            Value::Object(m) if m.is_empty() => return Lookup::Missing,
            Value::Object(m) => match m.get(seg) {
                Some(v) => cur = v,
                None => return Lookup::Missing,
            },
            _ => return Lookup::Covered,
        }
    }
    Lookup::Found(cur)
}

fn found<'a>(doc: Option<&'a Value>, path: &FieldPath) -> Option<&'a Value> {
    match doc.map(|d| lookup(d, path)) {
        Some(Lookup::Found(v)) => Some(v),
        _ => None,
    }
}

/// Visit every leaf of `doc`. Non-empty objects are recursed into.
fn walk_leaves<'a>(
    doc: &'a Value,
    path: FieldPath,
    visit: &mut dyn FnMut(FieldPath, &'a Value),
) {
    match doc {
        Value::Object(m) if !m.is_empty() => {
            for (k, v) in m {
                walk_leaves(v, path.child(k), visit);
            }
        }
        _ => visit(path, doc),
    }
}

/// Whether `live` already carries everything `desired` asks for. Extra keys
/// on live objects (server defaults) are tolerated, array lengths are not.
pub fn satisfies(live: Option<&Value>, desired: &Value) -> bool {
    match (desired, live) {
        (Value::Null, None) => true,
        (_, None) => false,
        (Value::Object(d), Some(Value::Object(l))) => {
            d.iter().all(|(k, dv)| satisfies(l.get(k), dv))
        }
        (Value::Array(d), Some(Value::Array(l))) => {
            d.len() == l.len()
                && d.iter().zip(l.iter()).all(|(dv, lv)| satisfies(Some(lv), dv))
        }
        (d, Some(l)) => d == l,
    }
}

/// Copy of `doc` without status, server-populated metadata or the
/// last-applied annotation.
pub fn strip_volatile(doc: &Value) -> Value {
    let mut out = doc.clone();
    if let Value::Object(ref mut root) = out {
        root.remove("status");
        if let Some(Value::Object(meta)) = root.get_mut("metadata") {
            for k in VOLATILE_METADATA {
                meta.remove(*k);
            }
            let drop_annotations = match meta.get_mut("annotations") {
                Some(Value::Object(ann)) => {
                    ann.remove(LAST_APPLIED_ANNOTATION);
                    ann.is_empty()
                }
                Some(Value::Null) => true,
                _ => false,
            };
            if drop_annotations {
                meta.remove("annotations");
            }
        }
    }
    out
}

impl FieldSet {
    /// Classify the fields of the three documents. Inputs are stripped of
    /// volatile fields first, so raw API objects can be passed in.
    pub fn classify(
        desired: &Value,
        last_applied: Option<&Value>,
        live: &Value,
    ) -> FieldSet {
        let desired = strip_volatile(desired);
        let last = last_applied.map(strip_volatile);
        let live = strip_volatile(live);
        let mut entries = Vec::new();

        walk_leaves(&desired, FieldPath::root(), &mut |path, d| {
            let live_v = found(Some(&live), &path);
            let last_v = found(last.as_ref(), &path);
            let desired_changed = last_v != Some(d);
            let live_changed = match last_v {
                Some(l) => !satisfies(live_v, l),
                None => live_v.is_some() && !satisfies(live_v, d),
            };
            let drift = match (desired_changed, live_changed) {
                (false, false) => Drift::Unchanged,
                (true, false) => Drift::DesiredChanged,
                (false, true) => Drift::LiveChanged,
                (true, true) => Drift::BothChanged,
            };
            entries.push(FieldEntry {
                needs_patch: !satisfies(live_v, d),
                path,
                ownership: Ownership::Controller,
                drift: Some(drift),
            });
        });

        if let Some(last) = last.as_ref() {
            walk_leaves(last, FieldPath::root(), &mut |path, _| {
                if matches!(lookup(&desired, &path), Lookup::Missing) {
                    entries.push(FieldEntry {
                        needs_patch: matches!(lookup(&live, &path), Lookup::Found(_)),
                        path,
                        ownership: Ownership::Removed,
                        drift: None,
                    });
                }
            });
        }

        walk_leaves(&live, FieldPath::root(), &mut |path, _| {
            let in_desired = !matches!(lookup(&desired, &path), Lookup::Missing);
            let in_last = last
                .as_ref()
                .map(|l| !matches!(lookup(l, &path), Lookup::Missing))
                .unwrap_or(false);
            if !in_desired && !in_last {
                entries.push(FieldEntry {
                    path,
                    ownership: Ownership::External,
                    drift: None,
                    needs_patch: false,
                });
            }
        });

        FieldSet { entries }
    }

    pub fn owned_by(&self, owner: Ownership) -> impl Iterator<Item = &FieldEntry> {
        self.entries.iter().filter(move |e| e.ownership == owner)
    }

    pub fn pending(&self) -> impl Iterator<Item = &FieldEntry> {
        self.entries.iter().filter(|e| e.needs_patch)
    }

    pub fn is_in_sync(&self) -> bool {
        self.pending().next().is_none()
    }

    /// Controller fields that an external actor changed since the last apply.
    pub fn conflicts(&self) -> impl Iterator<Item = &FieldEntry> {
        self.entries.iter().filter(|e| {
            e.needs_patch
                && matches!(e.drift, Some(Drift::LiveChanged | Drift::BothChanged))
        })
    }

    /// JSON merge patch bringing live in line with `desired`. Returns an empty
    /// object when nothing needs to change.
    pub fn patch(&self, desired: &Value) -> Value {
        let desired = strip_volatile(desired);
        let mut patch = Value::Object(Map::new());
        for e in self.pending() {
            let value = match e.ownership {
                Ownership::Controller => match lookup(&desired, &e.path) {
                    Lookup::Found(v) => v.clone(),
                    _ => continue,
                },
                Ownership::Removed => Value::Null,
                Ownership::External => continue,
            };
            set_path(&mut patch, e.path.segments(), value);
        }
        patch
    }
}

/// Insert `value` at `path`, creating intermediate objects.
pub fn set_path(doc: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *doc = value;
        return;
    };
    let mut cur = doc;
    for seg in parents {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        let Value::Object(m) = cur else { return };
        cur = m
            .entry(seg.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    if let Value::Object(m) = cur {
        m.insert(last.clone(), value);
    }
}

pub fn is_empty_patch(patch: &Value) -> bool {
    matches!(patch, Value::Object(m) if m.is_empty())
}
