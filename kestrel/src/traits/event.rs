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

use std::any::{Any, TypeId};
use std::fmt::Debug;

use dyn_clone::DynClone;

/// An immutable, typed payload carried over channels.
///
/// Implement it with `#[kestrel_event]` rather than by hand. The macro also
/// handles variants: an event declared with `#[kestrel_event(extends = base)]`
/// answers [`view`](Event::view) for its own kind and for every kind its `base`
/// field can be viewed as. Channels use `view` to decide which subscriptions an
/// event reaches, so a handler registered for a base kind receives its variants.
pub trait Event: DynClone + Any + Send + Sync + Debug {
    /// The concrete event as [`Any`].
    fn as_any(&self) -> &dyn Any;

    /// Type name of the concrete event, used in logs and errors.
    fn event_name(&self) -> &'static str;

    /// This event seen as the kind `kind`, if it is that kind or a variant of it.
    fn view(&self, kind: TypeId) -> Option<&dyn Any> {
        let any = self.as_any();
        (Any::type_id(any) == kind).then_some(any)
    }
}

dyn_clone::clone_trait_object!(Event);

/// Views `event` as the kind `E`.
///
/// For a variant this returns the embedded base value, not the variant.
pub fn view_as<E: Event>(event: &dyn Event) -> Option<&E> {
    event
        .view(TypeId::of::<E>())
        .and_then(|any| any.downcast_ref::<E>())
}

#[cfg(test)]
mod tests {
    use kestrel_macro::kestrel_event;

    use super::*;

    #[kestrel_event]
    struct Base {
        code: u32,
    }

    #[kestrel_event(extends = base)]
    struct Middle {
        base: Base,
        label: &'static str,
    }

    #[kestrel_event(extends = inner)]
    struct Leaf {
        inner: Middle,
    }

    #[kestrel_event]
    struct Unrelated;

    #[test]
    fn plain_event_views_only_itself() {
        let event = Base { code: 7 };
        assert_eq!(view_as::<Base>(&event).map(|b| b.code), Some(7));
        assert!(view_as::<Unrelated>(&event).is_none());
        assert!(event.event_name().ends_with("Base"));
    }

    #[test]
    fn variants_view_as_every_ancestor() {
        let leaf = Leaf {
            inner: Middle {
                base: Base { code: 3 },
                label: "mid",
            },
        };
        assert!(view_as::<Leaf>(&leaf).is_some());
        assert_eq!(view_as::<Middle>(&leaf).map(|m| m.label), Some("mid"));
        assert_eq!(view_as::<Base>(&leaf).map(|b| b.code), Some(3));
        assert!(view_as::<Unrelated>(&leaf).is_none());
    }

    #[test]
    fn boxed_events_clone() {
        let boxed: Box<dyn Event> = Box::new(Middle {
            base: Base { code: 1 },
            label: "x",
        });
        let copy = boxed.clone();
        assert_eq!(view_as::<Base>(copy.as_ref()).map(|b| b.code), Some(1));
    }
}
