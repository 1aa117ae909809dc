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

use std::collections::VecDeque;

use crate::channel::Priority;

/// Priority bands with bounded starvation.
///
/// `pop` serves the highest non-empty band, FIFO within the band. A lower band
/// that has been passed over `burst` times in a row while non-empty is served
/// once before the higher bands resume.
#[derive(Debug)]
pub(crate) struct ReadyQueue<T> {
    bands: [VecDeque<T>; Priority::BANDS],
    passed_over: [usize; Priority::BANDS],
    burst: usize,
}

impl<T> ReadyQueue<T> {
    pub(crate) fn new(burst: usize) -> Self {
        Self {
            bands: Default::default(),
            passed_over: [0; Priority::BANDS],
            burst: burst.max(1),
        }
    }

    pub(crate) fn push(&mut self, priority: Priority, item: T) {
        self.bands[priority.band()].push_back(item);
    }

    pub(crate) fn pop(&mut self) -> Option<T> {
        let top = self.bands.iter().position(|band| !band.is_empty())?;
        let chosen = (top + 1..Priority::BANDS)
            .find(|&band| !self.bands[band].is_empty() && self.passed_over[band] >= self.burst)
            .unwrap_or(top);
        for band in 0..Priority::BANDS {
            if band == chosen || self.bands[band].is_empty() {
                self.passed_over[band] = 0;
            } else if band > chosen {
                self.passed_over[band] += 1;
            }
        }
        self.bands[chosen].pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.len();
        for band in &mut self.bands {
            band.clear();
        }
        self.passed_over = [0; Priority::BANDS];
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_first_then_fifo() {
        let mut queue = ReadyQueue::new(32);
        queue.push(Priority::Low, "low-1");
        queue.push(Priority::Normal, "normal-1");
        queue.push(Priority::High, "high-1");
        queue.push(Priority::Normal, "normal-2");
        queue.push(Priority::High, "high-2");

        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(
            order,
            vec!["high-1", "high-2", "normal-1", "normal-2", "low-1"]
        );
    }

    #[test]
    fn lower_band_is_served_after_a_burst() {
        let mut queue = ReadyQueue::new(3);
        queue.push(Priority::Low, 0);
        for n in 1..=10 {
            queue.push(Priority::High, n);
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(order, vec![1, 2, 3, 0, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn clear_reports_dropped_items() {
        let mut queue = ReadyQueue::new(4);
        queue.push(Priority::High, 1);
        queue.push(Priority::Low, 2);
        assert_eq!(queue.clear(), 2);
        assert!(queue.pop().is_none());
    }
}
