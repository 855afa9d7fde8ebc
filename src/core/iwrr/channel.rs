//! Per-key channels and the interleaved dispatch sequence.
//!
//! Only the dispatcher and submitters touch a [`ChannelSet`], always under the
//! scheduler's lock, so nothing in here synchronizes on its own.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tracing::warn;

use super::{ChannelKey, ChannelWeigher};

/// A task waiting in its channel, stamped for dispatch-latency reporting.
pub(crate) struct Pending<T> {
    pub executable: T,
    pub enqueued_at: Instant,
}

impl<T> Pending<T> {
    pub fn new(executable: T) -> Self {
        Self {
            executable,
            enqueued_at: Instant::now(),
        }
    }
}

struct Channel<T, K> {
    key: K,
    weight: u32,
    queue: VecDeque<Pending<T>>,
}

/// A weight that changed at a cycle boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WeightChange<K> {
    pub key: K,
    pub from: u32,
    pub to: u32,
}

/// A task taken off the sequence, with the index of its channel.
pub(crate) struct Selected<T> {
    pub channel: usize,
    pub pending: Pending<T>,
}

/// Every channel ever seen, in creation order, plus the cyclic dispatch
/// sequence over them.
pub(crate) struct ChannelSet<T, K> {
    channels: Vec<Channel<T, K>>,
    index: HashMap<K, usize>,
    sequence: Vec<usize>,
    cursor: usize,
    pending: usize,
    stale: bool,
    weight_changes: Vec<WeightChange<K>>,
}

impl<T, K: ChannelKey> ChannelSet<T, K> {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            index: HashMap::new(),
            sequence: Vec::new(),
            cursor: 0,
            pending: 0,
            stale: false,
            weight_changes: Vec::new(),
        }
    }

    /// Tasks waiting across all channels.
    pub const fn pending(&self) -> usize {
        self.pending
    }

    /// Number of channels created so far.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn key_of(&self, channel: usize) -> &K {
        &self.channels[channel].key
    }

    /// Index of the channel for `key`, creating it on first use.
    ///
    /// A new channel joins the sequence at the next cycle boundary; the
    /// cycle in progress keeps its position.
    pub fn channel_for(&mut self, key: K, weigher: &dyn ChannelWeigher<K>) -> usize {
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let weight = effective_weight(&key, weigher.weight(&key));
        let idx = self.channels.len();
        self.index.insert(key.clone(), idx);
        self.channels.push(Channel {
            key,
            weight,
            queue: VecDeque::new(),
        });
        self.stale = true;
        idx
    }

    /// Tasks waiting in one channel.
    pub fn channel_len(&self, channel: usize) -> usize {
        self.channels[channel].queue.len()
    }

    pub fn push(&mut self, channel: usize, pending: Pending<T>) {
        self.channels[channel].queue.push_back(pending);
        self.pending += 1;
    }

    /// Put a deferred task back at the tail of its channel. Capacity is not
    /// checked: the task already held a slot.
    pub fn requeue(&mut self, selected: Selected<T>) {
        self.push(selected.channel, selected.pending);
    }

    /// Next task in sequence order, skipping empty channels. Weights are
    /// re-read, and new channels picked up, whenever the cursor wraps.
    pub fn select(&mut self, weigher: &dyn ChannelWeigher<K>) -> Option<Selected<T>> {
        if self.pending == 0 {
            return None;
        }
        // After a wrap every channel is in the sequence, so the rest of this
        // pass plus one full pass is enough to reach a non-empty one.
        loop {
            if self.cursor >= self.sequence.len() {
                self.cursor = 0;
                self.reweigh(weigher);
            }
            let channel = self.sequence[self.cursor];
            self.cursor += 1;
            if let Some(pending) = self.channels[channel].queue.pop_front() {
                self.pending -= 1;
                return Some(Selected { channel, pending });
            }
        }
    }

    /// Remove every waiting task, channel by channel.
    pub fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.pending);
        for channel in &mut self.channels {
            drained.extend(channel.queue.drain(..).map(|pending| pending.executable));
        }
        self.pending = 0;
        drained
    }

    /// Weight changes observed since the last call.
    pub fn take_weight_changes(&mut self) -> Vec<WeightChange<K>> {
        std::mem::take(&mut self.weight_changes)
    }

    fn reweigh(&mut self, weigher: &dyn ChannelWeigher<K>) {
        let mut changed = false;
        for channel in &mut self.channels {
            let weight = effective_weight(&channel.key, weigher.weight(&channel.key));
            if weight != channel.weight {
                self.weight_changes.push(WeightChange {
                    key: channel.key.clone(),
                    from: channel.weight,
                    to: weight,
                });
                channel.weight = weight;
                changed = true;
            }
        }
        if changed || self.stale {
            self.rebuild();
        }
    }

    /// Heaviest channels first (ties by creation order); round `r` holds
    /// every channel whose weight exceeds `r`.
    fn rebuild(&mut self) {
        let mut order: Vec<usize> = (0..self.channels.len()).collect();
        order.sort_by(|&a, &b| self.channels[b].weight.cmp(&self.channels[a].weight));

        let max_weight = order.first().map_or(0, |&idx| self.channels[idx].weight);
        self.sequence.clear();
        for round in 0..max_weight {
            for &idx in &order {
                if self.channels[idx].weight > round {
                    self.sequence.push(idx);
                } else {
                    break;
                }
            }
        }
        self.stale = false;
    }

    #[cfg(test)]
    fn sequence_keys(&mut self) -> Vec<K> {
        if self.stale {
            self.rebuild();
        }
        self.sequence
            .iter()
            .map(|&idx| self.channels[idx].key.clone())
            .collect()
    }
}

fn effective_weight<K: ChannelKey>(key: &K, weight: u32) -> u32 {
    if weight == 0 {
        warn!(channel = ?key, "channel weight of 0 clamped to 1");
        1
    } else {
        weight
    }
}
