use crate::object::ObjectId;

/// Domain-separated BLAKE3 content hasher.
///
/// Every hasher prepends its domain tag to the hashed stream, so a tree and
/// a feature with identical canonical bytes never share an id.
#[derive(Clone, Copy, Debug)]
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Tree revisions, hashed over their logical content.
    pub const TREE: Self = Self::new("strata-tree-v1");
    /// Feature payloads.
    pub const FEATURE: Self = Self::new("strata-feature-v1");
    /// Feature type descriptors.
    pub const FEATURE_TYPE: Self = Self::new("strata-featuretype-v1");

    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash a byte slice in one shot.
    pub fn hash(&self, data: &[u8]) -> ObjectId {
        let mut funnel = self.funnel();
        funnel.put_raw(data);
        funnel.finish()
    }

    /// Start a streaming hash for a canonical encoding built field by field.
    pub fn funnel(&self) -> Funnel {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        Funnel { hasher }
    }

    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Streaming sink for canonical encodings.
///
/// All multi-byte integers are written big-endian, strings and byte strings
/// are length prefixed, so distinct field sequences never produce the same
/// stream.
pub struct Funnel {
    hasher: blake3::Hasher,
}

impl Funnel {
    pub fn put_raw(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn put_u8(&mut self, v: u8) {
        self.hasher.update(&[v]);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.put_u8(v as u8);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.hasher.update(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.hasher.update(&v.to_be_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.hasher.update(&v.to_be_bytes());
    }

    /// Doubles are funneled by bit pattern.
    pub fn put_f64(&mut self, v: f64) {
        self.put_u64(v.to_bits());
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    pub fn put_bytes(&mut self, data: &[u8]) {
        self.put_u32(data.len() as u32);
        self.hasher.update(data);
    }

    pub fn put_id(&mut self, id: &ObjectId) {
        self.hasher.update(id.as_bytes());
    }

    pub fn finish(self) -> ObjectId {
        ObjectId::from_hash(*self.hasher.finalize().as_bytes())
    }
}
