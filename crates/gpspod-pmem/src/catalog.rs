use tracing::{debug, info, warn};

use crate::error::{PmemError, Result};
use crate::source::ByteSource;
use crate::track::{
    HeaderFault, Lap, Sample, TrackHeader, END_OF_CHAIN, HEADER_SIZE, LAP_SIZE, SAMPLE_SIZE,
};

/// Offset of the first log record in the PMEM file.
pub const LOG_AREA_OFFSET: u32 = 0xF_FC40;

/// Upper bound on records followed in one scan.
pub const DEFAULT_MAX_TRACKS: usize = 4096;

/// Configuration for a [`Catalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Where the record chain starts.
    pub log_area_offset: u32,
    /// Stop after this many records.
    pub max_tracks: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            log_area_offset: LOG_AREA_OFFSET,
            max_tracks: DEFAULT_MAX_TRACKS,
        }
    }
}

/// A track in the catalog; samples and laps are decoded on demand.
#[derive(Debug, Clone)]
pub struct Track {
    header: TrackHeader,
    entries: Option<Vec<Sample>>,
    laps: Vec<Lap>,
}

impl Track {
    pub fn get_header(&self) -> &TrackHeader {
        &self.header
    }

    /// Samples, once loaded through [`Catalog::load_entries`].
    pub fn get_entries(&self) -> Result<&[Sample]> {
        self.entries
            .as_deref()
            .ok_or(PmemError::State("track entries not loaded"))
    }

    /// Lap markers, in flash order, once entries are loaded.
    pub fn get_laps(&self) -> Result<&[Lap]> {
        self.get_entries()?;
        Ok(&self.laps)
    }

    pub fn is_loaded(&self) -> bool {
        self.entries.is_some()
    }
}

/// The list of tracks found on the record chain, in flash order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    config: CatalogConfig,
    tracks: Option<Vec<Track>>,
}

impl Catalog {
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            config,
            tracks: None,
        }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.tracks.is_some()
    }

    /// Walk the record chain and collect track headers.
    ///
    /// Corrupt records are skipped and returned; errors reading the source
    /// abort the scan.
    pub fn load_tracks<S: ByteSource>(&mut self, source: &mut S) -> Result<Vec<PmemError>> {
        let size = source.size();
        let mut tracks = Vec::new();
        let mut failures = Vec::new();
        let mut offset = self.config.log_area_offset;
        let mut visited = 0;

        while (offset as usize).saturating_add(HEADER_SIZE) <= size {
            if visited == self.config.max_tracks {
                warn!(max = self.config.max_tracks, "track limit reached, stopping scan");
                break;
            }
            visited += 1;

            let raw = source.read(offset as usize, HEADER_SIZE)?;
            let next = match TrackHeader::parse(offset, &raw, size) {
                Ok(header) => {
                    debug!(
                        offset = format_args!("{offset:#08x}"),
                        start = %header.start,
                        samples = header.sample_count,
                        "track"
                    );
                    let next = header.next;
                    tracks.push(Track {
                        header,
                        entries: None,
                        laps: Vec::new(),
                    });
                    next
                }
                Err(HeaderFault::NoMagic) => {
                    debug!(offset = format_args!("{offset:#08x}"), "end of record chain");
                    break;
                }
                Err(HeaderFault::Corrupt { reason, next }) => {
                    warn!(offset = format_args!("{offset:#08x}"), %reason, "skipping corrupt track");
                    failures.push(PmemError::CatalogCorrupt { offset, reason });
                    next
                }
            };

            if next == END_OF_CHAIN {
                break;
            }
            if next <= offset || next as usize >= size {
                warn!(
                    offset = format_args!("{offset:#08x}"),
                    next = format_args!("{next:#x}"),
                    "record chain leaves the image, stopping scan"
                );
                break;
            }
            offset = next;
        }

        info!(
            tracks = tracks.len(),
            corrupt = failures.len(),
            "track catalog loaded"
        );
        self.tracks = Some(tracks);
        Ok(failures)
    }

    pub fn get_tracks(&self) -> Result<&[Track]> {
        self.tracks
            .as_deref()
            .ok_or(PmemError::State("tracks not loaded"))
    }

    pub fn track(&self, index: usize) -> Result<&Track> {
        let tracks = self.get_tracks()?;
        tracks.get(index).ok_or(PmemError::NoSuchTrack {
            index,
            count: tracks.len(),
        })
    }

    /// Decode the samples and laps of track `index`; later calls reuse them.
    ///
    /// Laps pointing past the last sample are dropped.
    pub fn load_entries<S: ByteSource>(
        &mut self,
        index: usize,
        source: &mut S,
    ) -> Result<&[Sample]> {
        let tracks = self
            .tracks
            .as_mut()
            .ok_or(PmemError::State("tracks not loaded"))?;
        let count = tracks.len();
        let track = tracks
            .get_mut(index)
            .ok_or(PmemError::NoSuchTrack { index, count })?;

        if track.entries.is_none() {
            let header = &track.header;
            let samples_len = header.sample_count as usize * SAMPLE_SIZE;
            let length = samples_len + usize::from(header.lap_count) * LAP_SIZE;
            let raw = if length == 0 {
                Vec::new()
            } else {
                source.read(header.samples_offset(), length)?
            };
            let (sample_bytes, lap_bytes) = raw.split_at(samples_len);
            let samples: Vec<Sample> = sample_bytes
                .chunks_exact(SAMPLE_SIZE)
                .map(|chunk| Sample::parse(chunk, header.format))
                .collect();
            let mut laps = Vec::new();
            for lap in lap_bytes.chunks_exact(LAP_SIZE).map(Lap::parse) {
                if lap.sample_index < header.sample_count {
                    laps.push(lap);
                } else {
                    warn!(index, sample = lap.sample_index, "dropping lap past the last sample");
                }
            }
            debug!(index, samples = samples.len(), laps = laps.len(), "track entries loaded");
            track.laps = laps;
            track.entries = Some(samples);
        }
        track.get_entries()
    }
}
