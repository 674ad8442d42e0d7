// Background decoding for the song loader
// A single worker thread drains a job queue; completions land in the
// loader's slots through their tickets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use super::{NodeId, Track};
use crate::error::Result;
use crate::playback::loader::{LoadTicket, SongData};

/// Turns a playlist entry into decoded song data
pub trait TrackDecoder: Send + Sync + 'static {
    fn decode(&self, node: NodeId, track: &Track) -> Result<SongData>;
}

struct DecodeJob {
    ticket: LoadTicket,
    track: Track,
    epoch: u64,
}

pub struct DecoderPool {
    decoder: Arc<dyn TrackDecoder>,
    jobs: Option<Sender<DecodeJob>>,
    worker: Option<JoinHandle<()>>,
    epoch: Arc<AtomicU64>,
}

impl DecoderPool {
    /// Start the worker thread
    pub fn spawn(decoder: Arc<dyn TrackDecoder>) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<DecodeJob>();
        let epoch = Arc::new(AtomicU64::new(0));

        let worker_decoder = Arc::clone(&decoder);
        let worker_epoch = Arc::clone(&epoch);
        let worker = thread::Builder::new()
            .name("ocarina-decoder".into())
            .spawn(move || {
                debug!("Decoder worker started");
                for job in receiver {
                    if job.epoch != worker_epoch.load(Ordering::SeqCst) {
                        debug!("Skipping decode of {} queued before reset", job.track.file_path.display());
                        continue;
                    }
                    let result = worker_decoder.decode(job.ticket.node(), &job.track);
                    job.ticket.complete(result);
                }
                debug!("Decoder worker stopped");
            })?;

        info!("Decoder pool started");
        Ok(Self {
            decoder,
            jobs: Some(sender),
            worker: Some(worker),
            epoch,
        })
    }

    /// Decode on the calling thread; loads complete before `decode_into` returns
    pub fn inline(decoder: Arc<dyn TrackDecoder>) -> Self {
        Self {
            decoder,
            jobs: None,
            worker: None,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn decode_blocking(&self, node: NodeId, track: &Track) -> Result<SongData> {
        self.decoder.decode(node, track)
    }

    pub fn decode_into(&self, ticket: LoadTicket, track: Track) {
        let Some(jobs) = &self.jobs else {
            let result = self.decoder.decode(ticket.node(), &track);
            ticket.complete(result);
            return;
        };

        let job = DecodeJob {
            ticket,
            track,
            epoch: self.epoch.load(Ordering::SeqCst),
        };
        if let Err(mpsc::SendError(job)) = jobs.send(job) {
            error!("Decoder worker is gone, decoding {} inline", job.track.file_path.display());
            let result = self.decoder.decode(job.ticket.node(), &job.track);
            job.ticket.complete(result);
        }
    }

    /// Drop every queued job that has not started yet
    pub fn reset_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for DecoderPool {
    fn drop(&mut self) {
        // closing the channel ends the worker loop
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Decoder worker panicked");
            }
        }
    }
}

#[cfg(feature = "audio")]
pub use rodio_decoder::RodioTrackDecoder;

#[cfg(feature = "audio")]
mod rodio_decoder {
    use std::fs::File;
    use std::io::BufReader;

    use rodio::Source;
    use tracing::debug;

    use super::TrackDecoder;
    use crate::audio::{NodeId, PcmBuffer, Track};
    use crate::error::{PlayerError, Result};
    use crate::playback::loader::SongData;

    /// Decodes whole files to 16-bit PCM with rodio's symphonia backend
    #[derive(Debug, Default, Clone, Copy)]
    pub struct RodioTrackDecoder;

    impl TrackDecoder for RodioTrackDecoder {
        fn decode(&self, node: NodeId, track: &Track) -> Result<SongData> {
            let path = &track.file_path;
            let file = File::open(path).map_err(|e| PlayerError::decode(path, e))?;
            let source = rodio::Decoder::new(BufReader::new(file)).map_err(|e| PlayerError::decode(path, e))?;

            let channels = source.channels();
            let sample_rate = source.sample_rate();
            let samples: Vec<i16> = source.collect();
            if samples.is_empty() {
                return Err(PlayerError::decode(path, "no audio frames"));
            }

            let pcm = PcmBuffer::new(channels, sample_rate, samples);
            debug!(
                "Decoded {} ({} Hz, {} ch, {:.1}s)",
                path.display(),
                sample_rate,
                channels,
                pcm.duration().as_secs_f64()
            );
            Ok(SongData::decoded(node, track, pcm))
        }
    }
}
