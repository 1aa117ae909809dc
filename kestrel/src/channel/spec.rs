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

use std::any::TypeId;
use std::fmt;

use crate::traits::Event;

/// The kind of an event: its type, with the type name kept for messages.
#[derive(Clone, Copy)]
pub struct EventKind {
    type_id: TypeId,
    name: &'static str,
}

impl EventKind {
    /// The kind of `E`.
    #[must_use]
    pub fn of<E: Event>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: std::any::type_name::<E>(),
        }
    }

    /// The [`TypeId`] of the kind.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name of the kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether `event` is this kind or a variant of it.
    pub fn matches(&self, event: &dyn Event) -> bool {
        event.view(self.type_id).is_some()
    }
}

impl PartialEq for EventKind {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for EventKind {}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Declaration of a channel: its name and the event kinds it carries.
///
/// ```rust,ignore
/// let spec = ChannelSpec::new("timer-requests")
///     .carries::<ScheduleTimeout>()
///     .carries::<CancelTimeout>();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub(crate) name: String,
    pub(crate) carries: Vec<EventKind>,
}

impl ChannelSpec {
    /// A channel named `name` that carries nothing yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            carries: Vec::new(),
        }
    }

    /// Adds `E`, and with it every variant of `E`, to the carried kinds.
    #[must_use]
    pub fn carries<E: Event>(mut self) -> Self {
        let kind = EventKind::of::<E>();
        if !self.carries.contains(&kind) {
            self.carries.push(kind);
        }
        self
    }
}
