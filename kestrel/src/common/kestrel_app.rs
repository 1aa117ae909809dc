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

use tracing::trace;

use crate::common::{KestrelConfig, KestrelRuntime, CONFIG};

/// Entry point for starting a Kestrel runtime.
///
/// ```rust,ignore
/// let runtime = KestrelApp::launch_async().await;
/// let timer = TimerService::spawn(&runtime).await?;
/// // ... create, start and wire components
/// runtime.shutdown_all().await?;
/// ```
#[derive(Default, Debug, Clone)]
pub struct KestrelApp;

impl KestrelApp {
    /// Launches a runtime using the configuration found in the XDG config directory.
    pub async fn launch_async() -> KestrelRuntime {
        trace!("Starting Kestrel runtime");
        let config = CONFIG.clone();
        trace!("Configuration loaded: {:?}", config);
        Self::launch_with_config(config)
    }

    /// Launches a runtime from synchronous code, with the XDG configuration.
    ///
    /// Components still need a Tokio runtime to run on once created.
    #[must_use]
    pub fn launch() -> KestrelRuntime {
        Self::launch_with_config(CONFIG.clone())
    }

    /// Launches a runtime with an explicit configuration.
    #[must_use]
    pub fn launch_with_config(config: KestrelConfig) -> KestrelRuntime {
        let runtime = KestrelRuntime::new(config);
        trace!("Kestrel runtime ready");
        runtime
    }
}
