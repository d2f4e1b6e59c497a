//! Analysis taps feed scopes and meters outside the audio path.

use rtrb::Consumer;

use super::RingSink;

/// Create a tap sink and its reader. The ring holds `capacity` samples,
/// rounded up to whole blocks.
pub fn analysis_tap(capacity: usize) -> (RingSink, TapReader) {
    let blocks = capacity.div_ceil(dasp_graph::Buffer::LEN).max(1);
    let (sink, consumer) = RingSink::with_blocks(blocks, 1);
    (sink, TapReader { consumer })
}

/// Reading end of an analysis tap.
///
/// A reader that falls behind loses whole blocks rather than stalling audio.
pub struct TapReader {
    consumer: Consumer<f32>,
}

impl TapReader {
    /// Samples waiting to be read.
    pub fn available(&self) -> usize {
        self.consumer.slots()
    }

    /// Move every waiting sample into `out`; returns how many were read.
    pub fn read_into(&mut self, out: &mut Vec<f32>) -> usize {
        let n = self.consumer.slots();
        match self.consumer.read_chunk(n) {
            Ok(chunk) => {
                out.extend(chunk);
                n
            }
            Err(_) => 0,
        }
    }

    /// Drain everything and keep only the newest `n` samples.
    pub fn latest(&mut self, n: usize) -> Vec<f32> {
        let mut all = Vec::with_capacity(self.available());
        self.read_into(&mut all);
        let skip = all.len().saturating_sub(n);
        all.split_off(skip)
    }

    /// Throw away everything waiting.
    pub fn clear(&mut self) {
        let n = self.consumer.slots();
        if let Ok(chunk) = self.consumer.read_chunk(n) {
            chunk.commit_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dasp_graph::Buffer;

    fn block(value: f32) -> Buffer {
        let mut b = Buffer::SILENT;
        b.iter_mut().for_each(|s| *s = value);
        b
    }

    #[test]
    fn reader_sees_written_blocks_in_order() {
        let (mut sink, mut reader) = analysis_tap(256);
        sink.write(&[block(0.1)]);
        sink.write(&[block(0.2)]);
        assert_eq!(reader.available(), 128);

        let mut out = Vec::new();
        assert_eq!(reader.read_into(&mut out), 128);
        assert_eq!(out[0], 0.1);
        assert_eq!(out[127], 0.2);
        assert_eq!(reader.available(), 0);
    }

    #[test]
    fn latest_keeps_the_tail() {
        let (mut sink, mut reader) = analysis_tap(100);
        sink.write(&[block(0.1)]);
        sink.write(&[block(0.2)]);
        // 100 rounds up to two blocks; a third does not fit.
        assert!(!sink.write(&[block(0.3)]));
        let tail = reader.latest(10);
        assert_eq!(tail, vec![0.2; 10]);

        sink.write(&[block(0.4)]);
        reader.clear();
        assert_eq!(reader.available(), 0);
    }
}
