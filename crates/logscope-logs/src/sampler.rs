use std::collections::HashMap;

use logscope_types::{ArcRecord, FieldKind, Key, KeyMap, SchemaConfig, is_reserved_field};

/// Number of most recent matches the engine samples
pub const DEFAULT_SAMPLE_SIZE: usize = 20;

/// Infer the key schema from a sample of records.
///
/// Existing keys keep their order; keys seen for the first time are appended
/// in the order they appear in the sample. A key whose sampled values
/// disagree (with each other or with its existing kind) becomes text.
pub fn infer_schema(sample: &[ArcRecord], existing: &[Key]) -> (SchemaConfig, KeyMap) {
    let mut order: Vec<String> = existing.iter().map(|k| k.name.clone()).collect();
    let mut seen: HashMap<String, Option<FieldKind>> = existing
        .iter()
        .map(|k| (k.name.clone(), Some(k.kind)))
        .collect();

    for record in sample {
        for (name, value) in record.fields() {
            if is_reserved_field(name) {
                continue;
            }
            let observed = FieldKind::of(value);
            match seen.get_mut(name) {
                Some(kind) => *kind = widen(*kind, observed),
                None => {
                    order.push(name.clone());
                    seen.insert(name.clone(), observed);
                }
            }
        }
    }

    let keys: Vec<Key> = order
        .into_iter()
        .map(|name| {
            let kind = seen.get(&name).copied().flatten().unwrap_or_default();
            Key::new(name, kind)
        })
        .collect();

    let schema = SchemaConfig {
        last_saved_name: None,
        keys,
    };
    let key_map = schema.key_map();
    (schema, key_map)
}

fn widen(current: Option<FieldKind>, observed: Option<FieldKind>) -> Option<FieldKind> {
    match (current, observed) {
        (kind, None) => kind,
        (None, kind) => kind,
        (Some(a), Some(b)) if a == b => Some(a),
        _ => Some(FieldKind::Text),
    }
}
