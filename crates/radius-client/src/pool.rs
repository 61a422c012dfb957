//! Per-worker, per-family socket pools
//!
//! A pool grows by one socket when every existing socket is saturated for
//! the requested identifier, up to `sockets_max`. Only the tail socket is
//! ever evicted, and only once it has fully drained, so surviving socket
//! indices stay stable for bound queries and in-flight timer keys.

use crate::socket::{AddressFamily, PoolSocket};
use crate::worker::WorkerMsg;
use std::io;
use tokio::sync::mpsc;
use tracing::debug;

/// Where the allocator found (or failed to find) a free slot.
pub(crate) enum SlotAlloc {
    /// Socket index, identifier slot, and socket generation to bind.
    Free {
        socket_index: usize,
        slot: u8,
        generation: u64,
    },
    /// Every socket is saturated and the pool is at its ceiling.
    Exhausted,
}

pub(crate) struct SocketPool {
    pub family: AddressFamily,
    sockets: Vec<PoolSocket>,
    min: usize,
    max: usize,
    snd_buf: usize,
    rcv_buf: usize,
    /// Monotonic tag handed to each socket this pool ever opens.
    next_generation: u64,
}

impl SocketPool {
    pub fn new(
        family: AddressFamily,
        min: usize,
        max: usize,
        snd_buf: usize,
        rcv_buf: usize,
    ) -> Self {
        SocketPool {
            family,
            sockets: Vec::with_capacity(max),
            min,
            max,
            snd_buf,
            rcv_buf,
            next_generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn socket_mut(&mut self, index: usize) -> Option<&mut PoolSocket> {
        self.sockets.get_mut(index)
    }

    /// Find a free slot for the query, growing the pool when every existing
    /// socket is out of capacity for the requested identifier.
    ///
    /// `fixed` is the caller-chosen identifier, or `None` for automatic
    /// selection via each socket's rotating cursor.
    pub fn allocate(
        &mut self,
        fixed: Option<u8>,
        events: &mpsc::Sender<WorkerMsg>,
    ) -> io::Result<SlotAlloc> {
        let mut found = None;
        for (socket_index, skt) in self.sockets.iter().enumerate() {
            let slot = match fixed {
                Some(id) => skt.free_fixed_slot(id),
                None => skt.free_auto_slot(),
            };
            if let Some(slot) = slot {
                found = Some((socket_index, slot, skt.generation));
                break;
            }
        }
        if let Some((socket_index, slot, generation)) = found {
            if fixed.is_none() {
                self.sockets[socket_index].advance_cursor(slot);
            }
            return Ok(SlotAlloc::Free {
                socket_index,
                slot,
                generation,
            });
        }

        if self.sockets.len() >= self.max {
            return Ok(SlotAlloc::Exhausted);
        }

        let socket_index = self.sockets.len();
        let generation = self.next_generation;
        self.next_generation += 1;
        let skt = PoolSocket::open(
            self.family,
            socket_index,
            generation,
            self.snd_buf,
            self.rcv_buf,
            events.clone(),
        )?;
        debug!(family = ?self.family, socket_index, "socket pool grew");
        self.sockets.push(skt);

        let slot = match fixed {
            Some(id) => id,
            None => {
                let slot = self.sockets[socket_index]
                    .free_auto_slot()
                    .expect("fresh socket has free slots");
                self.sockets[socket_index].advance_cursor(slot);
                slot
            }
        };
        Ok(SlotAlloc::Free {
            socket_index,
            slot,
            generation,
        })
    }

    /// Tail-only shrink: close the socket at `released_index` if it is the
    /// tail, has drained, and the pool is above its floor.
    pub fn maybe_evict(&mut self, released_index: usize) {
        if self.sockets.len() <= self.min {
            return;
        }
        if released_index + 1 != self.sockets.len() {
            return;
        }
        if self.sockets[released_index].queries_count != 0 {
            return;
        }
        // Dropping the socket aborts its receive task.
        self.sockets.pop();
        debug!(family = ?self.family, socket_index = released_index, "socket pool shrank");
    }

    /// Tear every socket down, returning the drained queries with their
    /// timer keys so the worker can complete them.
    pub fn teardown(
        &mut self,
    ) -> Vec<(
        Box<crate::query::Query>,
        Option<tokio_util::time::delay_queue::Key>,
    )> {
        let mut drained = Vec::new();
        for skt in self.sockets.iter_mut() {
            drained.extend(skt.drain());
        }
        self.sockets.clear();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Query, QueryId};
    use radius_proto::{Code, Packet};
    use std::time::Duration;
    use tokio_util::time::DelayQueue;

    fn pool(min: usize, max: usize) -> SocketPool {
        SocketPool::new(AddressFamily::V4, min, max, 64 * 1024, 64 * 1024)
    }

    fn dummy_query() -> Box<Query> {
        Box::new(Query::new(
            Packet::new(Code::AccessRequest, 0, [0u8; 16]),
            QueryId::Auto,
            Box::new(|_| {}),
            0,
            AddressFamily::V4,
        ))
    }

    #[tokio::test]
    async fn test_grows_on_demand() {
        let (tx, _rx) = mpsc::channel(8);
        let mut pool = pool(1, 2);
        assert_eq!(pool.len(), 0);

        match pool.allocate(None, &tx).unwrap() {
            SlotAlloc::Free { socket_index, slot, .. } => {
                assert_eq!(socket_index, 0);
                assert_eq!(slot, 0);
            }
            SlotAlloc::Exhausted => panic!("expected a slot"),
        }
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_at_ceiling() {
        let (tx, _rx) = mpsc::channel(8);
        let mut pool = pool(1, 1);
        let mut timers = DelayQueue::new();

        // Saturate the single allowed socket.
        for _ in 0..Packet::ID_COUNT {
            match pool.allocate(None, &tx).unwrap() {
                SlotAlloc::Free { socket_index, slot, .. } => {
                    let key = timers.insert((), Duration::from_secs(60));
                    pool.socket_mut(socket_index)
                        .unwrap()
                        .attach(slot, dummy_query(), key);
                }
                SlotAlloc::Exhausted => panic!("exhausted too early"),
            }
        }
        assert!(matches!(
            pool.allocate(None, &tx).unwrap(),
            SlotAlloc::Exhausted
        ));
    }

    #[tokio::test]
    async fn test_fixed_id_forces_growth() {
        let (tx, _rx) = mpsc::channel(8);
        let mut pool = pool(1, 2);
        let mut timers = DelayQueue::new();

        // Occupy identifier 7 on the first socket.
        match pool.allocate(Some(7), &tx).unwrap() {
            SlotAlloc::Free { socket_index, slot, .. } => {
                assert_eq!((socket_index, slot), (0, 7));
                let key = timers.insert((), Duration::from_secs(60));
                pool.socket_mut(0).unwrap().attach(7, dummy_query(), key);
            }
            SlotAlloc::Exhausted => panic!("expected a slot"),
        }

        // Identifier 7 again: first socket is busy at that slot, so the
        // pool opens a second socket even though 255 other slots are free.
        match pool.allocate(Some(7), &tx).unwrap() {
            SlotAlloc::Free { socket_index, slot, .. } => {
                assert_eq!((socket_index, slot), (1, 7));
            }
            SlotAlloc::Exhausted => panic!("expected growth"),
        }
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_tail_only_eviction() {
        let (tx, _rx) = mpsc::channel(8);
        let mut pool = pool(1, 3);
        let mut timers = DelayQueue::new();

        // Two sockets, the first kept busy.
        match pool.allocate(None, &tx).unwrap() {
            SlotAlloc::Free { socket_index, slot, .. } => {
                let key = timers.insert((), Duration::from_secs(60));
                pool.socket_mut(socket_index)
                    .unwrap()
                    .attach(slot, dummy_query(), key);
            }
            SlotAlloc::Exhausted => panic!(),
        }
        match pool.allocate(Some(0), &tx).unwrap() {
            SlotAlloc::Free { socket_index, .. } => assert_eq!(socket_index, 1),
            SlotAlloc::Exhausted => panic!(),
        }
        assert_eq!(pool.len(), 2);

        // A non-tail release does not shrink the pool.
        pool.maybe_evict(0);
        assert_eq!(pool.len(), 2);

        // The drained tail goes away.
        pool.maybe_evict(1);
        assert_eq!(pool.len(), 1);

        // The floor is respected even when the new tail drains.
        let (query, _) = pool.socket_mut(0).unwrap().detach(0).unwrap();
        drop(query);
        pool.maybe_evict(0);
        assert_eq!(pool.len(), 1);
    }
}
