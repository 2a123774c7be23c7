//! The comparator contract (§3 "Invariants (global)", last bullet): a
//! strict weak order plus declared sentinel minimum/maximum values such
//! that `cmp(min, min) = false`, `cmp(min, max) = true`,
//! `cmp(max, min) = false`, `cmp(max, max) = false`.

/// `less(a, b)` is the strict weak order `cmp` used throughout the merge
/// core; `min_value`/`max_value` are the sentinels used to pad partial
/// blocks and mark empty merge cursors.
pub trait SortCmp<T>: Clone + Send {
    fn less(&self, a: &T, b: &T) -> bool;
    fn min_value(&self) -> T;
    fn max_value(&self) -> T;
}

/// The ordinary `<` order over any `Ord` type with `T::min_value()`/
/// `T::max_value()` supplied by the caller — the common case for the
/// worked examples (§8 "Concrete scenarios") sorting integers.
#[derive(Clone)]
pub struct Less<T> {
    min: T,
    max: T,
}

impl<T: Clone> Less<T> {
    pub fn new(min: T, max: T) -> Self {
        Less { min, max }
    }
}

impl<T: Ord + Clone + Send> SortCmp<T> for Less<T> {
    fn less(&self, a: &T, b: &T) -> bool {
        a < b
    }

    fn min_value(&self) -> T {
        self.min.clone()
    }

    fn max_value(&self) -> T {
        self.max.clone()
    }
}

impl Less<i32> {
    pub fn default_i32() -> Self {
        Less::new(i32::MIN, i32::MAX)
    }
}

impl Less<u64> {
    pub fn default_u64() -> Self {
        Less::new(u64::MIN, u64::MAX)
    }
}

impl Less<u32> {
    pub fn default_u32() -> Self {
        Less::new(u32::MIN, u32::MAX)
    }
}
