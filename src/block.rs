//! A small typed wrapper around raw block counts/offsets, so that call sites
//! read `Block(4)` rather than a bare integer of ambiguous unit.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Sub, SubAssign};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Block<T>(pub T);

impl Block<u32> {
    pub fn as_u64(self) -> u64 {
        self.0 as u64
    }
}

impl Block<u64> {
    pub fn as_u32(self) -> u32 {
        self.0 as u32
    }
}

impl<T: Add<Output = T>> Add for Block<T> {
    type Output = Block<T>;
    fn add(self, rhs: Self) -> Self::Output {
        Block(self.0 + rhs.0)
    }
}

impl<T: AddAssign> AddAssign for Block<T> {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl<T: Sub<Output = T>> Sub for Block<T> {
    type Output = Block<T>;
    fn sub(self, rhs: Self) -> Self::Output {
        Block(self.0 - rhs.0)
    }
}

impl<T: SubAssign> SubAssign for Block<T> {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}
