//! First-works / first-fails bookkeeping for the version matrix sweep.

/// Value that can be set once and is never overwritten afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Latch<T>(Option<T>);

impl<T> Default for Latch<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T> Latch<T> {
    /// Store `value` unless something was stored before. Returns true if stored.
    pub fn set_once(&mut self, value: T) -> bool {
        if self.0.is_some() {
            return false;
        }
        self.0 = Some(value);
        true
    }

    pub fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }

    pub fn into_inner(self) -> Option<T> {
        self.0
    }
}

/// Tracks the first passing and first failing label in iteration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixTally<T> {
    first_works: Latch<T>,
    first_fails: Latch<T>,
}

impl<T> Default for MatrixTally<T> {
    fn default() -> Self {
        Self {
            first_works: Latch::default(),
            first_fails: Latch::default(),
        }
    }
}

impl<T: Clone> MatrixTally<T> {
    pub fn record(&mut self, label: &T, ok: bool) {
        if ok {
            self.first_works.set_once(label.clone());
        } else {
            self.first_fails.set_once(label.clone());
        }
    }

    pub fn first_works(&self) -> Option<&T> {
        self.first_works.get()
    }

    pub fn first_fails(&self) -> Option<&T> {
        self.first_fails.get()
    }

    pub fn into_parts(self) -> (Option<T>, Option<T>) {
        (self.first_works.into_inner(), self.first_fails.into_inner())
    }
}
