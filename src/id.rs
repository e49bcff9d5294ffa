use uuid::Uuid;

/// Source of collision-resistant opaque ids for receipts, subscriptions and
/// transactions.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random (v4) UUIDs in their hyphenated form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
