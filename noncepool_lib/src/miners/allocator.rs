// Copyright (C) 2025 NoncePool Developers (see AUTHORS)
//
// This file is part of NoncePool
//
// NoncePool is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// NoncePool is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// NoncePool. If not, see <https://www.gnu.org/licenses/>.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Size of the 32 bit header nonce space miners search.
pub const NONCE_SPACE: u64 = 1 << 32;

/// A contiguous slice of the nonce space handed to one miner identity.
///
/// `size` can be the whole space, so it does not fit a u32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NonceRange {
    pub start: u32,
    pub size: u64,
}

/// Order miners by weight, heaviest first, breaking ties on the identity so
/// the same weights always produce the same table.
fn by_weight_then_identity(a: &(&str, u64), b: &(&str, u64)) -> Ordering {
    b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0))
}

/// Partition the nonce space between the given miners, proportional to weight.
///
/// Every miner but the last in sort order gets `floor(2^32 * weight / total)`,
/// at least 1. The last one takes whatever is left, so the sizes always add up
/// to exactly 2^32 and the ranges, laid end to end from 0, never overlap.
/// Weights below 1 count as 1.
///
/// A share is capped so every miner after it can still get one nonce. The cap
/// only bites once the total weight exceeds 2^32.
pub fn allocate<S: AsRef<str>>(weights: &HashMap<S, u64>) -> HashMap<String, NonceRange> {
    let mut miners: Vec<(&str, u64)> = weights
        .iter()
        .map(|(identity, weight)| (identity.as_ref(), (*weight).max(1)))
        .collect();
    miners.sort_by(by_weight_then_identity);

    let total_weight: u128 = miners.iter().map(|(_, weight)| *weight as u128).sum();

    let mut ranges = HashMap::with_capacity(miners.len());
    let mut cursor: u64 = 0;
    let mut allocated: u64 = 0;
    let last = miners.len().saturating_sub(1);

    for (position, (identity, weight)) in miners.into_iter().enumerate() {
        let size = if position == last {
            NONCE_SPACE - allocated
        } else {
            let share = (NONCE_SPACE as u128 * weight as u128 / total_weight) as u64;
            let reserved_for_rest = (last - position) as u64;
            share.max(1).min(NONCE_SPACE - allocated - reserved_for_rest)
        };
        ranges.insert(
            identity.to_string(),
            NonceRange {
                start: cursor as u32,
                size,
            },
        );
        cursor = (cursor + size) % NONCE_SPACE;
        allocated += size;
    }
    ranges
}
