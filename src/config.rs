//! Registry configuration.

/// What a task does when it joins a container that already has members.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JoinPolicy {
    /// Join returns immediately. Every member runs freely and members
    /// coordinate through per-object locks.
    #[default]
    NonBlocking,

    /// Only one member of a container is active at a time.
    ///
    /// The first member becomes active. Later joiners sleep until the active
    /// member leaves, at which point the turn passes to the next member in
    /// join order. A parked joiner that is removed with `leave` (or by
    /// registry shutdown) before its turn wakes with `NotInContainer`.
    Parked,
}

/// Which backing store allocates memory objects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackingKind {
    /// Anonymous memfd mapped `MAP_SHARED`. Every installed mapping is an
    /// independent `mmap` of the same physical pages.
    #[default]
    Memfd,
    /// Zeroed heap allocation. Installed mappings share the allocation.
    Heap,
}

/// Configuration for a [`Registry`](crate::registry::Registry).
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Join behavior for containers that already have members.
    pub join_policy: JoinPolicy,
    /// Backing store for memory objects.
    pub backing: BackingKind,
    /// Round requested object lengths up to the system page size.
    pub page_align: bool,
    /// Debug name prefix for memfd-backed objects (visible in `/proc/self/fd/`).
    pub name_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            join_policy: JoinPolicy::NonBlocking,
            backing: BackingKind::Memfd,
            page_align: true,
            name_prefix: "memory-container".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Create a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the join policy.
    pub fn with_join_policy(mut self, policy: JoinPolicy) -> Self {
        self.join_policy = policy;
        self
    }

    /// Set the backing store kind.
    pub fn with_backing(mut self, backing: BackingKind) -> Self {
        self.backing = backing;
        self
    }

    /// Enable or disable page rounding of object lengths.
    pub fn with_page_align(mut self, page_align: bool) -> Self {
        self.page_align = page_align;
        self
    }

    /// Set the memfd debug name prefix.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Length actually allocated for a request of `requested` bytes.
    pub fn object_len(&self, requested: usize) -> usize {
        if self.page_align && requested > 0 {
            let page = rustix::param::page_size();
            requested.div_ceil(page) * page
        } else {
            requested
        }
    }
}
