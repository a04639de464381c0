use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use gpspod_frame::{
    DeviceInfo, DeviceStatus, HeaderStep, LogHeaderEntry, Opcode, Reply, Request, Settings,
};
use gpspod_link::{Communicator, LinkError, RetryPolicy};
use gpspod_pmem::{
    Catalog, CatalogConfig, Lap, MemoryImage, PagedMemory, PmemError, Result, Sample, Track,
    TrackHeader,
};
use tracing::{debug, info, warn};

/// Configuration for a [`Session`].
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Retry budget and block pacing for flash reads.
    pub retry: RetryPolicy,
    pub catalog: CatalogConfig,
}

/// One pod and, once mounted, its track catalog.
///
/// Catalog calls must follow `mount`, `load_tracks`, then the per-track
/// accessors. Calls out of that order fail with [`PmemError::State`].
pub struct Session<C> {
    memory: PagedMemory<C>,
    config: SessionConfig,
    catalog: Option<Catalog>,
}

fn unexpected(expected: Opcode, reply: &Reply) -> PmemError {
    PmemError::Link(LinkError::UnexpectedReply {
        expected,
        got: reply.to_string(),
    })
}

impl<C: Communicator> Session<C> {
    pub fn new(com: C, config: SessionConfig) -> Self {
        Self {
            memory: PagedMemory::new(com, config.retry.clone()),
            config,
            catalog: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn exchange(&mut self, request: Request) -> Result<Reply> {
        Ok(self.memory.communicator_mut().exchange(&request)?)
    }

    pub fn device_info(&mut self) -> Result<DeviceInfo> {
        match self.exchange(Request::DeviceInfo)? {
            Reply::DeviceInfo(info) => Ok(info),
            other => Err(unexpected(Opcode::DeviceInfo, &other)),
        }
    }

    pub fn device_status(&mut self) -> Result<DeviceStatus> {
        match self.exchange(Request::DeviceStatus)? {
            Reply::DeviceStatus(status) => Ok(status),
            other => Err(unexpected(Opcode::DeviceStatus, &other)),
        }
    }

    pub fn read_settings(&mut self) -> Result<Settings> {
        match self.exchange(Request::ReadSettings)? {
            Reply::Settings(settings) => Ok(settings),
            other => Err(unexpected(Opcode::ReadSettings, &other)),
        }
    }

    pub fn reset(&mut self) -> Result<()> {
        match self.exchange(Request::Reset)? {
            Reply::Reset => Ok(()),
            other => Err(unexpected(Opcode::Reset, &other)),
        }
    }

    pub fn log_count(&mut self) -> Result<u16> {
        match self.exchange(Request::LogCount)? {
            Reply::LogCount(count) => Ok(count),
            other => Err(unexpected(Opcode::LogCount, &other)),
        }
    }

    fn header_step(&mut self, request: Request) -> Result<HeaderStep> {
        let opcode = request.opcode();
        let reply = self.exchange(request)?;
        match (&reply, opcode) {
            (Reply::LogHeaderRewind(step), Opcode::LogHeaderRewind)
            | (Reply::LogHeaderPeek(step), Opcode::LogHeaderPeek)
            | (Reply::LogHeaderStep(step), Opcode::LogHeaderStep) => Ok(*step),
            _ => Err(unexpected(opcode, &reply)),
        }
    }

    /// Walk the device's own log-header list.
    ///
    /// Runs count, rewind, then step/entry/peek until peek reports the end.
    pub fn device_log_headers(&mut self) -> Result<Vec<LogHeaderEntry>> {
        let count = self.log_count()?;
        if count == 0 {
            debug!("device reports no log headers");
            return Ok(Vec::new());
        }

        self.header_step(Request::LogHeaderRewind)?;
        let mut entries = Vec::with_capacity(count.into());
        loop {
            self.header_step(Request::LogHeaderStep)?;
            match self.exchange(Request::LogHeaderEntry)? {
                Reply::LogHeaderEntry(entry) => entries.push(entry),
                other => return Err(unexpected(Opcode::LogHeaderEntry, &other)),
            }
            if self.header_step(Request::LogHeaderPeek)?.is_end() {
                break;
            }
            if entries.len() >= usize::from(count) {
                warn!(count, "device keeps reporting more log headers, stopping");
                break;
            }
        }
        info!(entries = entries.len(), "log headers read");
        Ok(entries)
    }

    /// Attach a fresh catalog. With an image, flash reads are served from
    /// it; without one, the cache is emptied and blocks are fetched from the
    /// device on demand.
    pub fn mount(&mut self, image: Option<MemoryImage>) {
        let image = match image {
            Some(image) => {
                info!(
                    size = image.size(),
                    present = image.present_blocks(),
                    "mounting image"
                );
                image
            }
            None => {
                info!("mounting device flash");
                MemoryImage::new()
            }
        };
        self.memory.set_image(image);
        self.catalog = Some(Catalog::new(self.config.catalog.clone()));
    }

    /// Scan the record chain. Returns the corrupt tracks that were skipped.
    pub fn load_tracks(&mut self) -> Result<Vec<PmemError>> {
        let catalog = self
            .catalog
            .as_mut()
            .ok_or(PmemError::State("not mounted"))?;
        catalog.load_tracks(&mut self.memory)
    }

    pub fn get_tracks(&self) -> Result<&[Track]> {
        self.mounted()?.get_tracks()
    }

    pub fn get_header(&self, index: usize) -> Result<&TrackHeader> {
        Ok(self.mounted()?.track(index)?.get_header())
    }

    pub fn load_entries(&mut self, index: usize) -> Result<&[Sample]> {
        let catalog = self
            .catalog
            .as_mut()
            .ok_or(PmemError::State("not mounted"))?;
        catalog.load_entries(index, &mut self.memory)
    }

    pub fn get_entries(&self, index: usize) -> Result<&[Sample]> {
        self.mounted()?.track(index)?.get_entries()
    }

    pub fn get_laps(&self, index: usize) -> Result<&[Lap]> {
        self.mounted()?.track(index)?.get_laps()
    }

    /// Read the whole flash.
    pub fn dump(&mut self) -> Result<&MemoryImage> {
        self.memory.read_all()
    }

    /// Read the flash below `limit`.
    pub fn dump_upto(&mut self, limit: usize) -> Result<&MemoryImage> {
        self.memory.read_upto(limit)
    }

    /// Abort flash reads between blocks once `flag` is set.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.memory.set_cancel_flag(flag);
    }

    /// Offset of the most recently fetched flash block.
    pub fn last_fetched(&self) -> Option<u32> {
        self.memory.last_fetched()
    }

    pub fn round_trips(&self) -> u64 {
        self.memory.round_trips()
    }

    pub fn image(&self) -> &MemoryImage {
        self.memory.image()
    }

    pub fn communicator_mut(&mut self) -> &mut C {
        self.memory.communicator_mut()
    }

    /// Hand back the communicator and whatever flash was read.
    pub fn into_parts(self) -> (C, MemoryImage) {
        self.memory.into_parts()
    }

    fn mounted(&self) -> Result<&Catalog> {
        self.catalog.as_ref().ok_or(PmemError::State("not mounted"))
    }
}
