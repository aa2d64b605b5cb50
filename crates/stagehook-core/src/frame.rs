//! Frame-step list: avatars advanced once per render tick

/// Ordered set of `(name, handle)`; a handle appears at most once
#[derive(Debug, Clone)]
pub struct FrameSteps<H> {
    avatars: Vec<(String, H)>,
}

impl<H> Default for FrameSteps<H> {
    fn default() -> Self {
        Self {
            avatars: Vec::new(),
        }
    }
}

impl<H: Copy + PartialEq> FrameSteps<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the handle was already listed
    pub fn push(&mut self, name: &str, handle: H) -> bool {
        if self.contains(handle) {
            return false;
        }
        self.avatars.push((name.to_string(), handle));
        true
    }

    pub fn remove(&mut self, handle: H) -> bool {
        let before = self.avatars.len();
        self.avatars.retain(|(_, listed)| *listed != handle);
        before != self.avatars.len()
    }

    pub fn contains(&self, handle: H) -> bool {
        self.avatars.iter().any(|(_, listed)| *listed == handle)
    }

    /// How many slots reference `name`
    pub fn count_named(&self, name: &str) -> usize {
        self.avatars.iter().filter(|(listed, _)| listed == name).count()
    }

    pub fn handles(&self) -> Vec<H> {
        self.avatars.iter().map(|(_, handle)| *handle).collect()
    }

    pub fn len(&self) -> usize {
        self.avatars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.avatars.is_empty()
    }

    pub fn clear(&mut self) {
        self.avatars.clear();
    }
}
