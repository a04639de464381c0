//! Rebuild a flash image from the data replies in a recorded session.
//!
//! Replies are taken in capture order and the last reply for a block wins.
//! Replies not aligned to a block, or not a full block long, are skipped.
//! Blocks never seen stay zero and are reported as missing.

use std::ops::Range;

use gpspod_frame::{Assembler, Message, Reply};
use gpspod_link::SessionLog;
use tracing::{debug, info};

use crate::image::{MemoryImage, BLOCK_SIZE};

#[derive(Debug)]
pub struct Reconstruction {
    pub image: MemoryImage,
    /// Byte ranges no reply covered.
    pub missing: Vec<Range<usize>>,
    /// Block replies stored, duplicates included.
    pub blocks: usize,
    /// Data replies that could not be placed.
    pub skipped: usize,
}

impl Reconstruction {
    /// The image as a flat dump; missing ranges read as zeros.
    pub fn to_dump(&self) -> Vec<u8> {
        self.image.as_bytes().to_vec()
    }
}

pub fn reconstruct(log: &SessionLog) -> Reconstruction {
    let mut image = MemoryImage::new();
    let mut assembler = Assembler::new();
    let mut blocks = 0;
    let mut skipped = 0;

    for (index, entry) in log.incoming().enumerate() {
        let assembled = match assembler.push_raw(&entry.data) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(err) => {
                debug!(index, %err, "unusable packet");
                continue;
            }
        };
        let Ok(Reply::Data(block)) = Message::decode(&assembled).and_then(|m| Reply::from_message(&m))
        else {
            continue;
        };

        let position = block.position as usize;
        if position % BLOCK_SIZE != 0 || block.data.len() != BLOCK_SIZE {
            debug!(index, position, length = block.data.len(), "skipping unaligned data reply");
            skipped += 1;
            continue;
        }
        if image.store_block(position / BLOCK_SIZE, &block.data).is_err() {
            skipped += 1;
            continue;
        }
        blocks += 1;
    }

    let missing = image.missing_ranges();
    info!(
        blocks,
        skipped,
        present = image.present_blocks(),
        missing = missing.len(),
        "image reconstructed"
    );
    Reconstruction {
        image,
        missing,
        blocks,
        skipped,
    }
}
