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

pub use config::{KestrelConfig, CONFIG};
pub use errors::KestrelError;
pub use kestrel_app::KestrelApp;
pub use runtime::KestrelRuntime;
pub use types::{ChannelId, ComponentId, ComponentInfo, SubscriptionId, Traversal};
pub(crate) use types::{ControlRef, HandlerFn, HookFn};

/// Runtime configuration loaded from XDG locations.
pub mod config;
mod errors;
mod kestrel_app;
mod runtime;
mod types;
