// SPDX-License-Identifier: LGPL-3.0-only

pub mod alloc {
    #[must_use]
    pub fn vec_unique<T: Ord>(mut src: Vec<T>) -> Vec<T> {
        src.sort_unstable();
        src.dedup();
        src
    }
}

pub mod bytes {
    #[must_use]
    pub fn all_zero(data: &[u8]) -> bool {
        data.iter().all(|b| *b == 0)
    }
}

pub mod string {
    /// `drop_by_value` removes all occurrences of `v` from the text.
    #[must_use]
    pub fn drop_by_value(data: &str, v: char) -> String {
        data.chars().filter(|c| *c != v).collect()
    }
}
