use crate::format::{self, BlobHeader, HEADER_LENGTH, OVERHEAD};
use crate::packet::Packet;

/// Splits an outgoing packet stream into blobs
///
/// Every blob but the last carries `max_payload` bytes and the MORE flag. An empty stream
/// still produces one empty terminal blob.
#[derive(Debug, Clone)]
pub(crate) struct Scatter {
    length: usize,
    offset: usize,
    max_payload: usize,
    finished: bool,
}

impl Scatter {
    pub fn new(length: usize, max_payload: usize) -> Self {
        debug_assert!(max_payload > 0);
        Self {
            length,
            offset: 0,
            max_payload,
            finished: false,
        }
    }

    pub fn blob_count(&self) -> usize {
        self.length.div_ceil(self.max_payload).max(1)
    }

    /// Buffer size able to hold any blob of the stream
    pub fn max_blob_length(&self) -> usize {
        OVERHEAD + self.length.min(self.max_payload)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Writes the next blob into `blob`, returning its total length.
    pub fn fetch_blob(&mut self, packet: &Packet<'_>, blob: &mut [u8]) -> Option<usize> {
        if self.finished {
            return None;
        }
        let payload_length = (self.length - self.offset).min(self.max_payload);
        let more = self.offset + payload_length < self.length;
        let header = BlobHeader::new(payload_length, more);

        blob[..HEADER_LENGTH].copy_from_slice(&header.to_bytes());
        let copied = packet.copy_to_slice(
            self.offset,
            &mut blob[HEADER_LENGTH..HEADER_LENGTH + payload_length],
        );
        debug_assert!(copied == payload_length);

        self.offset += payload_length;
        self.finished = !more;
        Some(format::seal_blob(blob, header))
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::format::verify_blob;
    use crate::pool::{Bucket, Pool, SizeClass};
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use std::boxed::Box;
    use std::vec::Vec;

    fn make_pool() -> Pool<'static> {
        let bucket: &'static Bucket<CriticalSectionRawMutex, 64, 16> =
            Box::leak(Box::new(Bucket::new()));
        let classes: &'static [&'static (dyn SizeClass + Sync)] =
            Box::leak(Box::new([bucket as &(dyn SizeClass + Sync)]));
        Pool::new(classes)
    }

    fn scatter_all(data: &[u8], max_payload: usize) -> Vec<Vec<u8>> {
        let pool = make_pool();
        let packet = Packet::from_slice(&pool, data).unwrap();
        let mut scatter = Scatter::new(packet.len(), max_payload);
        let mut buffer = std::vec![0u8; scatter.max_blob_length()];
        let mut blobs = Vec::new();
        while let Some(length) = scatter.fetch_blob(&packet, &mut buffer) {
            blobs.push(buffer[..length].to_vec());
        }
        assert_eq!(blobs.len(), Scatter::new(data.len(), max_payload).blob_count());
        blobs
    }

    #[test]
    fn test_single_blob() {
        let blobs = scatter_all(b"Hello worl", 10);
        assert_eq!(blobs.len(), 1);
        let blob = &blobs[0];
        assert_eq!(blob.len(), 16);
        assert_eq!(&blob[..2], &10u16.to_ne_bytes());
        assert_eq!(&blob[2..12], b"Hello worl");
        assert!(verify_blob(blob, BlobHeader::new(10, false)));
    }

    #[test]
    fn test_multiple_blobs() {
        let data: Vec<u8> = (0..25).collect();
        let blobs = scatter_all(&data, 10);
        assert_eq!(blobs.len(), 3);

        let headers: Vec<_> = blobs
            .iter()
            .map(|blob| BlobHeader::from_bytes([blob[0], blob[1]]))
            .collect();
        assert_eq!(
            headers,
            [
                BlobHeader::new(10, true),
                BlobHeader::new(10, true),
                BlobHeader::new(5, false)
            ]
        );
        for (blob, header) in blobs.iter().zip(&headers) {
            assert!(verify_blob(blob, *header));
        }

        let payload: Vec<u8> = blobs
            .iter()
            .zip(&headers)
            .flat_map(|(blob, header)| blob[2..2 + header.length()].to_vec())
            .collect();
        assert_eq!(payload, data);
    }

    #[test]
    fn test_exact_multiple() {
        let data = [7u8; 20];
        let blobs = scatter_all(&data, 10);
        assert_eq!(blobs.len(), 2);
        assert!(!BlobHeader::from_bytes([blobs[1][0], blobs[1][1]]).more());
    }

    #[test]
    fn test_empty_stream() {
        let blobs = scatter_all(&[], 10);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].len(), OVERHEAD);
        assert_eq!(&blobs[0][..2], &[0, 0]);
    }
}
