// Cache key conventions. Uniqueness is up to the caller; these helpers only
// keep the namespace consistent across services sharing one store.

/// Key for a single object, e.g. `cache:object:employee:id:42`.
pub fn object_key(entity: &str, id: impl std::fmt::Display) -> String {
    format!("cache:object:{entity}:id:{id}")
}

/// Key for a cached list of IDs produced by a query.
pub fn multi_key(entity: &str, query: &str) -> String {
    format!("cache:multi:{entity}:{query}")
}

/// Name of the lock guarding a cache key in the lock store.
pub fn lock_name(key: &str) -> String {
    format!("lock:{key}")
}

/// Lock name for one field of a hash entry.
pub fn hash_member_lock_name(identifier: &str, field: &str) -> String {
    lock_name(&format!("{identifier}:{field}"))
}
