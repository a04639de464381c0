use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use gpspod_frame::{Opcode, Reply, Request};
use gpspod_link::{Attempt, Communicator, LinkError, RetryBudget, RetryError, RetryPolicy};
use tracing::{debug, info};

use crate::error::{PmemError, Result};
use crate::image::{MemoryImage, BLOCK_SIZE};
use crate::source::ByteSource;

const PROGRESS_INTERVAL: u64 = 64;

/// Device flash read on demand, one block request at a time.
///
/// Fetched blocks are kept in a [`MemoryImage`] and never requested again.
/// All reads share one retry budget.
pub struct PagedMemory<C> {
    com: C,
    image: MemoryImage,
    budget: RetryBudget,
    cancel: Option<Arc<AtomicBool>>,
    round_trips: u64,
    fetched: u64,
    last_fetched: Option<u32>,
}

impl<C: Communicator> PagedMemory<C> {
    pub fn new(com: C, policy: RetryPolicy) -> Self {
        Self::with_image(com, policy, MemoryImage::new())
    }

    /// Start from an existing, possibly partial, image.
    pub fn with_image(com: C, policy: RetryPolicy, image: MemoryImage) -> Self {
        Self {
            com,
            image,
            budget: RetryBudget::new(policy),
            cancel: None,
            round_trips: 0,
            fetched: 0,
            last_fetched: None,
        }
    }

    /// Checked before every block request; once set, reads fail with `Cancelled`.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    /// Read `length` bytes at `offset`, fetching the blocks not yet cached.
    pub fn read(&mut self, offset: usize, length: usize) -> Result<Vec<u8>> {
        self.image.check_bounds(offset, length)?;
        for block in MemoryImage::blocks_for(offset, length) {
            self.ensure_block(block)?;
        }
        Ok(self.image.get(offset, length)?.to_vec())
    }

    /// Fetch every missing block.
    pub fn read_all(&mut self) -> Result<&MemoryImage> {
        self.read_upto(self.image.size())
    }

    /// Fetch every missing block that starts below `limit`.
    pub fn read_upto(&mut self, limit: usize) -> Result<&MemoryImage> {
        let blocks = limit.min(self.image.size()).div_ceil(BLOCK_SIZE);
        info!(
            blocks,
            present = self.image.present_blocks(),
            "reading image"
        );
        for block in 0..blocks {
            self.ensure_block(block)?;
        }
        Ok(&self.image)
    }

    /// Requests written so far, retries included.
    pub fn round_trips(&self) -> u64 {
        self.round_trips
    }

    /// Offset of the most recently fetched block.
    pub fn last_fetched(&self) -> Option<u32> {
        self.last_fetched
    }

    /// Retry failures spent from the budget.
    pub fn failures(&self) -> u32 {
        self.budget.failures()
    }

    /// Replace the cached image, e.g. with a dump loaded from disk.
    pub fn set_image(&mut self, image: MemoryImage) -> MemoryImage {
        std::mem::replace(&mut self.image, image)
    }

    pub fn image(&self) -> &MemoryImage {
        &self.image
    }

    pub fn communicator_mut(&mut self) -> &mut C {
        &mut self.com
    }

    pub fn into_parts(self) -> (C, MemoryImage) {
        (self.com, self.image)
    }

    fn ensure_block(&mut self, block: usize) -> Result<()> {
        if self.image.is_block_present(block) {
            return Ok(());
        }
        let offset = (block * BLOCK_SIZE) as u32;
        if self
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
        {
            return Err(PmemError::Cancelled { offset });
        }
        if self.round_trips > 0 {
            let delay = self.budget.policy().delay;
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }

        let data = self.fetch_block(offset)?;
        self.image.store_block(block, &data)?;
        self.fetched += 1;
        self.last_fetched = Some(offset);
        debug!(offset = format_args!("{offset:#08x}"), "block fetched");
        if self.fetched % PROGRESS_INTERVAL == 0 {
            info!(
                fetched = self.fetched,
                present = self.image.present_blocks(),
                total = self.image.block_count(),
                "read progress"
            );
        }
        Ok(())
    }

    fn fetch_block(&mut self, offset: u32) -> Result<Bytes> {
        let com = &mut self.com;
        let round_trips = &mut self.round_trips;
        let request = Request::ReadData { offset };

        let outcome = self.budget.run(|| {
            *round_trips += 1;
            match com.exchange(&request) {
                Ok(Reply::Data(block))
                    if block.position == offset && block.data.len() == BLOCK_SIZE =>
                {
                    Ok(block.data)
                }
                Ok(Reply::Data(block)) => Err(Attempt::Retry(LinkError::UnexpectedReply {
                    expected: Opcode::ReadData,
                    got: format!("data at {:#08x}+{:#x}", block.position, block.length()),
                })),
                Ok(other) => Err(Attempt::Retry(LinkError::UnexpectedReply {
                    expected: Opcode::ReadData,
                    got: other.to_string(),
                })),
                Err(err) if err.is_corruption() => Err(Attempt::Retry(err)),
                Err(err) => Err(Attempt::Fatal(err)),
            }
        });

        outcome.map_err(|err| match err {
            RetryError::Exhausted { failures, last } => PmemError::FetchExhausted {
                offset,
                failures,
                last_error: last.to_string(),
            },
            RetryError::Fatal(err) => PmemError::Link(err),
        })
    }
}

impl<C: Communicator> ByteSource for PagedMemory<C> {
    fn size(&self) -> usize {
        self.image.size()
    }

    fn read(&mut self, offset: usize, length: usize) -> Result<Vec<u8>> {
        PagedMemory::read(self, offset, length)
    }
}

impl<C> std::fmt::Debug for PagedMemory<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedMemory")
            .field("image", &self.image)
            .field("budget", &self.budget)
            .field("round_trips", &self.round_trips)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gpspod_link::sim::{Fault, SimulatedPod};
    use gpspod_link::{Link, LinkConfig};

    use super::*;
    use crate::image::FILESYSTEM_SIZE;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_failures: 10,
            delay: Duration::ZERO,
        }
    }

    fn memory(flash: Vec<u8>) -> PagedMemory<Link<SimulatedPod>> {
        let link = Link::with_config(
            SimulatedPod::new(flash),
            LinkConfig {
                timeout: Duration::from_millis(20),
                verbose: false,
            },
        );
        PagedMemory::new(link, fast())
    }

    fn pattern() -> Vec<u8> {
        (0..8 * BLOCK_SIZE).map(|i| (i / 7) as u8).collect()
    }

    #[test]
    fn two_block_read_requests_both_in_order() {
        let mut mem = memory(pattern());
        let data = mem.read(0, 2 * BLOCK_SIZE).expect("read should succeed");
        assert_eq!(data, pattern()[..1024]);
        assert_eq!(
            mem.communicator_mut().transport().data_requests(),
            vec![0, 512]
        );
    }

    #[test]
    fn cached_reads_issue_no_requests() {
        let mut mem = memory(pattern());
        mem.read(100, 1000).unwrap();
        let before = mem.round_trips();
        assert_eq!(before, 2);

        let again = mem.read(600, 10).expect("cached read should succeed");
        assert_eq!(again, pattern()[600..610]);
        assert_eq!(mem.round_trips(), before);
    }

    #[test]
    fn unaligned_read_fetches_spanned_blocks() {
        let mut mem = memory(pattern());
        mem.read(1000, 600).unwrap();
        assert_eq!(
            mem.communicator_mut().transport().data_requests(),
            vec![512, 1024]
        );
        assert_eq!(mem.last_fetched(), Some(1024));
    }

    #[test]
    fn bad_replies_are_retried() {
        let mut mem = memory(pattern());
        let pod = mem.communicator_mut().transport_mut();
        pod.push_fault(Fault::Corrupt);
        pod.push_fault(Fault::Misplaced);
        pod.push_fault(Fault::WrongReply);

        let data = mem.read(512, 16).expect("read should recover");
        assert_eq!(data, pattern()[512..528]);
        assert_eq!(mem.round_trips(), 4);
        assert_eq!(mem.failures(), 3);
    }

    #[test]
    fn exhausted_after_budget_keeps_fetched_blocks() {
        let mut mem = memory(pattern());
        mem.read(0, 512).unwrap();
        let pod = mem.communicator_mut().transport_mut();
        for _ in 0..11 {
            pod.push_fault(Fault::Corrupt);
        }

        let err = mem.read(0, 2048).unwrap_err();
        assert!(
            matches!(err, PmemError::FetchExhausted { offset: 512, failures: 11, .. }),
            "{err}"
        );
        assert!(mem.image().is_block_present(0));
        assert!(!mem.image().is_block_present(1));
        assert_eq!(mem.last_fetched(), Some(0));
    }

    #[test]
    fn budget_is_shared_across_blocks() {
        let mut mem = memory(pattern());
        for _ in 0..5 {
            mem.communicator_mut().transport_mut().push_fault(Fault::Misplaced);
        }
        mem.read(0, 512).expect("first block should recover");
        assert_eq!(mem.failures(), 5);

        for _ in 0..6 {
            mem.communicator_mut().transport_mut().push_fault(Fault::Corrupt);
        }
        let err = mem.read(512, 512).unwrap_err();
        assert!(
            matches!(err, PmemError::FetchExhausted { offset: 512, failures: 11, .. }),
            "{err}"
        );
        assert!(mem.image().is_block_present(0));
    }

    /// Zeroes the magic byte of the next `remaining` received packets.
    struct Garble {
        pod: SimulatedPod,
        remaining: usize,
    }

    impl gpspod_transport::PacketTransport for Garble {
        fn send_packet(&mut self, packet: &[u8]) -> gpspod_transport::Result<()> {
            self.pod.send_packet(packet)
        }

        fn recv_packet(&mut self, timeout: Duration) -> gpspod_transport::Result<Option<Bytes>> {
            let Some(packet) = self.pod.recv_packet(timeout)? else {
                return Ok(None);
            };
            if self.remaining == 0 {
                return Ok(Some(packet));
            }
            self.remaining -= 1;
            let mut damaged = packet.to_vec();
            damaged[0] = 0x00;
            Ok(Some(Bytes::from(damaged)))
        }
    }

    #[test]
    fn bad_magic_is_retried() {
        let link = Link::with_config(
            Garble {
                pod: SimulatedPod::new(pattern()),
                remaining: 1,
            },
            LinkConfig {
                timeout: Duration::from_millis(20),
                verbose: false,
            },
        );
        let mut mem = PagedMemory::new(link, fast());

        let data = mem.read(0, 16).expect("read should recover from a garbled packet");
        assert_eq!(data, pattern()[..16]);
        assert_eq!(mem.failures(), 1);
        assert_eq!(mem.communicator_mut().transport().pod.data_requests(), vec![0, 0]);
    }

    #[test]
    fn timeout_is_not_retried() {
        let mut mem = memory(pattern());
        mem.communicator_mut().transport_mut().push_fault(Fault::Silent);
        let err = mem.read(0, 4).unwrap_err();
        assert!(matches!(err, PmemError::Link(LinkError::Timeout(_))), "{err}");
        assert_eq!(mem.round_trips(), 1);
        assert_eq!(mem.failures(), 0);
    }

    #[test]
    fn cancel_stops_before_next_block() {
        let mut mem = memory(pattern());
        mem.read(0, 512).unwrap();
        let flag = Arc::new(AtomicBool::new(false));
        mem.set_cancel_flag(flag.clone());
        flag.store(true, Ordering::SeqCst);

        assert!(matches!(
            mem.read(0, 1024),
            Err(PmemError::Cancelled { offset: 512 })
        ));
        // cached data stays readable
        assert!(mem.read(0, 512).is_ok());
    }

    #[test]
    fn out_of_bounds_is_rejected_without_io() {
        let mut mem = memory(Vec::new());
        assert!(matches!(
            mem.read(FILESYSTEM_SIZE - 4, 8),
            Err(PmemError::OutOfBounds { .. })
        ));
        assert_eq!(mem.round_trips(), 0);
    }

    #[test]
    fn read_upto_stops_at_limit() {
        let mut mem = memory(pattern());
        let image = mem.read_upto(1000).expect("bounded read should succeed");
        assert_eq!(image.present_blocks(), 2);
        assert_eq!(image.missing_ranges()[0].start, 1024);
        assert_eq!(
            mem.communicator_mut().transport().data_requests(),
            vec![0, 512]
        );
    }

    #[test]
    fn read_all_fills_small_image() {
        let link = Link::new(SimulatedPod::new(pattern()));
        let mut mem = PagedMemory::with_image(link, fast(), MemoryImage::with_size(8 * BLOCK_SIZE));
        let image = mem.read_all().expect("full read should succeed");
        assert!(image.is_complete());
        assert_eq!(image.as_bytes(), &pattern()[..]);
        assert_eq!(mem.round_trips(), 8);
    }
}
