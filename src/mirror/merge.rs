use std::collections::HashMap;
use std::hash::Hash;

/// Collapses duplicate keys. The last occurrence wins but keeps the slot of
/// the first one, so list order stays stable across rewrites.
pub fn dedup_by_key<T, K, F>(items: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut slots: HashMap<K, usize> = HashMap::with_capacity(items.len());
    let mut out: Vec<T> = Vec::with_capacity(items.len());

    for item in items {
        match slots.get(&key(&item)) {
            Some(&slot) => out[slot] = item,
            None => {
                slots.insert(key(&item), out.len());
                out.push(item);
            }
        }
    }

    out
}

/// Merges `incoming` over `existing`; records in `incoming` replace records
/// with the same key.
pub fn merge_by_key<T, K, F>(existing: Vec<T>, incoming: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut all = existing;
    all.extend(incoming);
    dedup_by_key(all, key)
}
