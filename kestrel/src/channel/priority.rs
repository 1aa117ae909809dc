/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::fmt::{Display, Formatter};

/// Dispatch priority of an invocation.
///
/// Among invocations ready on the same component, `High` runs before `Normal`
/// before `Low`, first-in first-out within a priority. Lower priorities still
/// get a turn after a bounded burst of higher ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// Timeouts and control traffic.
    High,
    /// Ordinary traffic.
    #[default]
    Normal,
    /// Background work.
    Low,
}

impl Priority {
    /// Number of priority bands.
    pub(crate) const BANDS: usize = 3;

    /// Queue band, 0 being served first.
    pub(crate) const fn band(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}
