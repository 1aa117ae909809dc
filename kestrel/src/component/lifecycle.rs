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

/// Lifecycle state of a component.
///
/// ```text
/// Uninitialized --create--> Created --start--> Started
///       \                      \                  \
///        `----------------------`------destroy-----`--> Destroyed
/// ```
///
/// A builder is `Uninitialized`. A `Created` component already accepts and
/// queues events but only runs handlers once `Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifecycle {
    /// Being built; not yet visible to the runtime.
    #[default]
    Uninitialized,
    /// Wired and queueing events.
    Created,
    /// Running handlers.
    Started,
    /// Torn down. Terminal.
    Destroyed,
}

impl Display for Lifecycle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Created => write!(f, "created"),
            Self::Started => write!(f, "started"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Whether destruction reaches children before or after the component itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestroyOrder {
    /// Children are destroyed first, then the component's own destroy hook runs.
    #[default]
    BottomUp,
    /// The component's destroy hook runs first, then the children are destroyed.
    TopDown,
}
