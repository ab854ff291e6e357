//! Target session: the context every reader is constructed from.

use crate::algorithm::{pick_algorithm, Algorithm, AlgorithmId, AlgorithmVersions};
use crate::corrupt::{CorruptDataReporter, TracingReporter};
use crate::error::{WalkError, WalkResult};
use std::sync::{Arc, OnceLock};
use structinfo::{decode_unsigned, sign_extend, AddressSpace, BlobSymbols, StructInfoError, StructReader};
use tracing::debug;

/// One inspection session against one target.
///
/// Holds the target's address space, its structure-description blob, the
/// corrupt-data sink, and the algorithm-version registry. The registry is
/// read from the blob the first time a reader asks for it and kept until
/// [`Session::attach`] switches to another target.
pub struct Session {
    memory: Arc<dyn AddressSpace>,
    blob: Arc<BlobSymbols>,
    reporter: Arc<dyn CorruptDataReporter>,
    versions: OnceLock<AlgorithmVersions>,
}

impl Session {
    /// Create a session that logs anomalies through `tracing`.
    pub fn new(memory: Arc<dyn AddressSpace>, blob: Arc<BlobSymbols>) -> Self {
        Session {
            memory,
            blob,
            reporter: Arc::new(TracingReporter),
            versions: OnceLock::new(),
        }
    }

    /// Replace the corrupt-data sink.
    pub fn with_reporter(mut self, reporter: Arc<dyn CorruptDataReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Use an explicit registry instead of reading one from the blob.
    pub fn with_algorithm_versions(mut self, versions: AlgorithmVersions) -> Self {
        self.versions = OnceLock::from(versions);
        self
    }

    /// Switch to a new target. The version registry is rebuilt on next use.
    pub fn attach(&mut self, memory: Arc<dyn AddressSpace>, blob: Arc<BlobSymbols>) {
        debug!("Attaching session to a new target");
        self.memory = memory;
        self.blob = blob;
        self.reset_versions();
    }

    /// Forget the version registry so the next reader re-reads it.
    pub fn reset_versions(&mut self) {
        self.versions = OnceLock::new();
    }

    /// The algorithm-version registry, initialized at most once.
    pub fn versions(&self) -> &AlgorithmVersions {
        self.versions
            .get_or_init(|| AlgorithmVersions::load(&self.blob))
    }

    /// Pick the implementation of `id` the target's layout calls for.
    pub fn pick<A: Algorithm>(
        &self,
        id: AlgorithmId,
        candidates: impl IntoIterator<Item = A>,
    ) -> WalkResult<A> {
        pick_algorithm(self.versions(), id.as_str(), candidates)
    }

    pub fn memory(&self) -> &dyn AddressSpace {
        self.memory.as_ref()
    }

    pub fn blob(&self) -> &BlobSymbols {
        &self.blob
    }

    pub fn reporter(&self) -> &dyn CorruptDataReporter {
        self.reporter.as_ref()
    }

    pub fn pointer_size(&self) -> usize {
        self.blob.pointer_size
    }

    /// A reader for the structure `type_name` at `address`.
    pub fn struct_reader(&self, address: u64, type_name: &str) -> WalkResult<StructReader<'_>> {
        Ok(StructReader::new(
            &self.blob,
            self.memory.as_ref(),
            address,
            type_name,
        )?)
    }

    /// Size of a described type; missing types are a metadata error.
    pub fn type_size(&self, type_name: &str) -> WalkResult<usize> {
        self.blob
            .type_size(type_name)
            .ok_or_else(|| WalkError::Metadata(StructInfoError::TypeNotFound(type_name.to_string())))
    }

    /// Offset of a described field; missing fields are a metadata error.
    pub fn field_offset(&self, type_name: &str, field: &str) -> WalkResult<usize> {
        self.blob.field_offset(type_name, field).ok_or_else(|| {
            WalkError::Metadata(StructInfoError::FieldNotFound {
                type_name: type_name.to_string(),
                field: field.to_string(),
            })
        })
    }

    /// Read raw bytes from the target.
    pub fn read_bytes(&self, address: u64, length: usize) -> WalkResult<Vec<u8>> {
        let bytes = self
            .memory
            .read(address, length)
            .map_err(|e| WalkError::unreadable("memory", address, e.to_string()))?;
        if bytes.len() < length {
            return Err(WalkError::unreadable(
                "memory",
                address,
                format!("short read: wanted {} bytes, got {}", length, bytes.len()),
            ));
        }
        Ok(bytes)
    }

    /// Read an unsigned 32-bit value in target byte order.
    pub fn read_u32(&self, address: u64) -> WalkResult<u32> {
        let bytes = self.read_bytes(address, 4)?;
        Ok(decode_unsigned(&bytes, self.blob.big_endian) as u32)
    }

    /// Read an unsigned 64-bit value in target byte order.
    pub fn read_u64(&self, address: u64) -> WalkResult<u64> {
        let bytes = self.read_bytes(address, 8)?;
        Ok(decode_unsigned(&bytes, self.blob.big_endian))
    }

    /// Read a pointer-sized word in target byte order.
    pub fn read_pointer(&self, address: u64) -> WalkResult<u64> {
        let bytes = self.read_bytes(address, self.blob.pointer_size)?;
        Ok(decode_unsigned(&bytes, self.blob.big_endian))
    }

    /// Read a pointer-sized word and sign-extend it to 64 bits.
    pub fn read_signed_pointer(&self, address: u64) -> WalkResult<u64> {
        let raw = self.read_pointer(address)?;
        Ok(sign_extend(raw, self.blob.pointer_size) as u64)
    }
}
