//! Order write-ahead log.
//!
//! Every state-mutating store operation serializes a record and appends
//! it here before the mutation becomes observable. Frames are a fixed
//! header (magic, version, sequence, timestamp, type, payload length,
//! CRC32 of the payload) followed by a little-endian payload of
//! length-prefixed strings and fixed-width scalars.
//!
//! Corruption never crashes the process: bad frames are counted, logged
//! and skipped, and the health flag surfaces through [`WalStats`].

use crate::config::WalConfig;
use crate::core::{
    OrderStatus, OrderType, PlaceOrderRequest, Side, Symbol, TimeInForce, WalError,
};
use crate::oms::store::{Order, OrderStore};
use crate::utils::now_ns;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Frame magic: "WALE"
pub const WAL_MAGIC: u32 = 0x5741_4C45;
/// On-disk format version
pub const WAL_VERSION: u32 = 1;
/// Serialized header length in bytes
pub const WAL_HEADER_LEN: usize = 36;

/// WAL entry types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalEntryType {
    OrderNew = 1,
    OrderUpdate = 2,
    OrderFill = 3,
    OrderCancel = 4,
    Checkpoint = 5,
    Rotation = 6,
}

impl WalEntryType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(WalEntryType::OrderNew),
            2 => Some(WalEntryType::OrderUpdate),
            3 => Some(WalEntryType::OrderFill),
            4 => Some(WalEntryType::OrderCancel),
            5 => Some(WalEntryType::Checkpoint),
            6 => Some(WalEntryType::Rotation),
            _ => None,
        }
    }
}

/// WAL statistics
#[derive(Debug, Default, Clone)]
pub struct WalStats {
    pub entries_written: u64,
    pub entries_replayed: u64,
    pub bytes_written: u64,
    pub bytes_replayed: u64,
    pub rotations: u64,
    pub checkpoints: u64,
    pub corrupted_entries: u64,
    pub sequence_gaps: u64,
    pub current_sequence: u64,
    pub healthy: bool,
}

struct WalState {
    file: Option<File>,
    file_size: u64,
    sequence: u64,
    entries_since_checkpoint: u64,
    stats: WalStats,
    healthy: bool,
}

/// Order write-ahead log with rotation, retention and replay.
pub struct OrderWal {
    config: WalConfig,
    state: Mutex<WalState>,
}

impl OrderWal {
    /// Open (or create) the WAL in its configured directory. The writer
    /// picks up the last existing file for appending; call
    /// [`OrderWal::replay_into`] before writing to recover state and seed
    /// the sequence from the highest replayed entry.
    pub fn new(config: WalConfig) -> Result<Self, WalError> {
        fs::create_dir_all(&config.directory)?;

        let wal = Self {
            state: Mutex::new(WalState {
                file: None,
                file_size: 0,
                sequence: 0,
                entries_since_checkpoint: 0,
                stats: WalStats {
                    healthy: true,
                    ..WalStats::default()
                },
                healthy: true,
            }),
            config,
        };

        {
            let mut state = wal.state.lock();
            // Seed the append target from the newest file on disk.
            if let Some(filename) = wal.list_wal_files()?.last() {
                if let Some(seq) = wal.parse_filename(filename) {
                    state.sequence = seq;
                    state.stats.current_sequence = seq;
                }
            }
            wal.open_current_file(&mut state)?;
            info!(
                dir = %wal.config.directory.display(),
                sequence = state.sequence,
                "order WAL opened"
            );
        }

        Ok(wal)
    }

    // ---------------------------------------------------------------
    // Write path
    // ---------------------------------------------------------------

    pub fn log_order_new(&self, request: &PlaceOrderRequest) -> Result<u64, WalError> {
        let payload = encode_order_new(request);
        self.write_entry(WalEntryType::OrderNew, &payload)
    }

    pub fn log_order_update(
        &self,
        client_order_id: &str,
        venue_order_id: &str,
        status: OrderStatus,
        reason: &str,
        ts_ns: i64,
    ) -> Result<u64, WalError> {
        let payload = encode_order_update(client_order_id, venue_order_id, status, reason, ts_ns);
        self.write_entry(WalEntryType::OrderUpdate, &payload)
    }

    pub fn log_order_fill(
        &self,
        client_order_id: &str,
        symbol: &Symbol,
        qty: f64,
        price: f64,
        ts_ns: i64,
    ) -> Result<u64, WalError> {
        let payload = encode_order_fill(client_order_id, symbol, qty, price, ts_ns);
        self.write_entry(WalEntryType::OrderFill, &payload)
    }

    pub fn log_order_cancel(
        &self,
        client_order_id: &str,
        reason: &str,
        ts_ns: i64,
    ) -> Result<u64, WalError> {
        let payload = encode_order_cancel(client_order_id, reason, ts_ns);
        self.write_entry(WalEntryType::OrderCancel, &payload)
    }

    /// Write a full-store snapshot. Collapses the replay prefix: recovery
    /// needs only the checkpoint and the tail after it.
    pub fn write_checkpoint(&self, store: &OrderStore) -> Result<u64, WalError> {
        let payload = encode_checkpoint(&store.list());
        let seq = self.write_entry(WalEntryType::Checkpoint, &payload)?;
        let mut state = self.state.lock();
        state.entries_since_checkpoint = 0;
        state.stats.checkpoints += 1;
        Ok(seq)
    }

    /// True once `checkpoint_interval` entries accumulated since the
    /// last checkpoint.
    pub fn needs_checkpoint(&self) -> bool {
        let state = self.state.lock();
        state.entries_since_checkpoint >= self.config.checkpoint_interval
    }

    /// Force a rotation: marker frame, close, reopen at the current
    /// sequence, drop files beyond the retention bound.
    pub fn rotate(&self) -> Result<(), WalError> {
        self.write_entry(WalEntryType::Rotation, &[])?;
        let mut state = self.state.lock();
        self.rotate_locked(&mut state)
    }

    /// Flush the current file to disk.
    pub fn sync(&self) -> Result<(), WalError> {
        let mut state = self.state.lock();
        if let Some(file) = state.file.as_mut() {
            file.sync_data()?;
        }
        Ok(())
    }

    pub fn stats(&self) -> WalStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.current_sequence = state.sequence;
        stats.healthy = state.healthy;
        stats
    }

    pub fn current_sequence(&self) -> u64 {
        self.state.lock().sequence
    }

    pub fn is_healthy(&self) -> bool {
        self.state.lock().healthy
    }

    fn write_entry(&self, entry_type: WalEntryType, payload: &[u8]) -> Result<u64, WalError> {
        let mut state = self.state.lock();

        if !state.healthy {
            warn!("WAL unhealthy, write continues but state is flagged");
        }

        if state.file_size >= self.config.max_file_size {
            // Rotation marker goes into the old file before it closes.
            self.append_frame(&mut state, WalEntryType::Rotation, &[])?;
            self.rotate_locked(&mut state)?;
        }

        let seq = self.append_frame(&mut state, entry_type, payload)?;
        state.entries_since_checkpoint += 1;
        Ok(seq)
    }

    fn append_frame(
        &self,
        state: &mut WalState,
        entry_type: WalEntryType,
        payload: &[u8],
    ) -> Result<u64, WalError> {
        let file = state.file.as_mut().ok_or(WalError::Unhealthy)?;

        state.sequence += 1;
        let sequence = state.sequence;

        let mut frame = Vec::with_capacity(WAL_HEADER_LEN + payload.len());
        frame.extend_from_slice(&WAL_MAGIC.to_le_bytes());
        frame.extend_from_slice(&WAL_VERSION.to_le_bytes());
        frame.extend_from_slice(&sequence.to_le_bytes());
        frame.extend_from_slice(&(now_ns() as u64).to_le_bytes());
        frame.push(entry_type as u8);
        frame.extend_from_slice(&[0u8; 3]);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        frame.extend_from_slice(payload);

        file.write_all(&frame)?;
        if self.config.sync_on_write {
            file.sync_data()?;
        }

        state.file_size += frame.len() as u64;
        state.stats.entries_written += 1;
        state.stats.bytes_written += frame.len() as u64;
        state.stats.current_sequence = sequence;
        Ok(sequence)
    }

    fn rotate_locked(&self, state: &mut WalState) -> Result<(), WalError> {
        if let Some(file) = state.file.as_mut() {
            if self.config.sync_on_write {
                file.sync_data()?;
            }
        }
        state.file = None;
        state.file_size = 0;
        self.open_current_file(state)?;
        state.stats.rotations += 1;
        self.cleanup_old_files()?;
        Ok(())
    }

    fn open_current_file(&self, state: &mut WalState) -> Result<(), WalError> {
        let path = self.file_path(state.sequence);
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                state.file_size = file.metadata().map(|m| m.len()).unwrap_or(0);
                state.file = Some(file);
                Ok(())
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to open WAL file");
                state.healthy = false;
                state.stats.healthy = false;
                Err(WalError::Io(e))
            }
        }
    }

    /// Delete the oldest files beyond the retention bound.
    pub fn cleanup_old_files(&self) -> Result<(), WalError> {
        let files = self.list_wal_files()?;
        if files.len() <= self.config.max_files {
            return Ok(());
        }
        let to_remove = files.len() - self.config.max_files;
        for filename in files.iter().take(to_remove) {
            let path = self.config.directory.join(filename);
            if fs::remove_file(&path).is_ok() {
                info!(file = %filename, "removed old WAL file");
            }
        }
        Ok(())
    }

    fn file_path(&self, sequence: u64) -> PathBuf {
        self.config
            .directory
            .join(format!("{}_{:016x}.wal", self.config.file_prefix, sequence))
    }

    fn parse_filename(&self, filename: &str) -> Option<u64> {
        let prefix = format!("{}_", self.config.file_prefix);
        let hex = filename.strip_prefix(&prefix)?.strip_suffix(".wal")?;
        if hex.len() != 16 {
            return None;
        }
        u64::from_str_radix(hex, 16).ok()
    }

    /// WAL files in the configured directory, sorted by name. The hex
    /// sequence in the name makes lexical order equal sequence order.
    fn list_wal_files(&self) -> Result<Vec<String>, WalError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.config.directory)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.parse_filename(&name).is_some() {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }

    // ---------------------------------------------------------------
    // Replay
    // ---------------------------------------------------------------

    /// Replay every frame in sequence order into the callback. Bad
    /// frames are counted and skipped per the corruption policy; the
    /// writer sequence is left at the highest replayed sequence so the
    /// next write extends the log instead of colliding with it.
    pub fn replay<F>(&self, mut callback: F) -> Result<(), WalError>
    where
        F: FnMut(WalEntryType, u64, i64, &[u8]),
    {
        let files = self.list_wal_files()?;
        let mut last_sequence: u64 = 0;
        let mut saw_corruption = false;
        let mut saw_gap = false;

        for filename in &files {
            let data = fs::read(self.config.directory.join(filename))?;
            let mut offset = 0usize;

            while offset + WAL_HEADER_LEN <= data.len() {
                let header = &data[offset..offset + WAL_HEADER_LEN];
                let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
                let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
                let sequence = u64::from_le_bytes(header[8..16].try_into().unwrap());
                let timestamp_ns = u64::from_le_bytes(header[16..24].try_into().unwrap()) as i64;
                let type_byte = header[24];
                let payload_len =
                    u32::from_le_bytes(header[28..32].try_into().unwrap()) as usize;
                let checksum = u32::from_le_bytes(header[32..36].try_into().unwrap());

                if magic != WAL_MAGIC {
                    warn!(file = %filename, offset, "invalid WAL magic, stopping file");
                    saw_corruption = true;
                    self.state.lock().stats.corrupted_entries += 1;
                    break;
                }
                if version != WAL_VERSION {
                    warn!(file = %filename, version, "unsupported WAL version, stopping file");
                    saw_corruption = true;
                    self.state.lock().stats.corrupted_entries += 1;
                    break;
                }
                if offset + WAL_HEADER_LEN + payload_len > data.len() {
                    warn!(file = %filename, offset, "truncated WAL entry, stopping file");
                    saw_corruption = true;
                    self.state.lock().stats.corrupted_entries += 1;
                    break;
                }

                let payload =
                    &data[offset + WAL_HEADER_LEN..offset + WAL_HEADER_LEN + payload_len];
                let frame_len = WAL_HEADER_LEN + payload_len;

                if crc32fast::hash(payload) != checksum {
                    warn!(file = %filename, offset, sequence, "WAL checksum mismatch, skipping entry");
                    saw_corruption = true;
                    self.state.lock().stats.corrupted_entries += 1;
                    offset += frame_len;
                    continue;
                }

                if sequence <= last_sequence {
                    warn!(sequence, last_sequence, "skipping duplicate WAL entry");
                    offset += frame_len;
                    continue;
                }
                if last_sequence > 0 && sequence > last_sequence + 1 {
                    warn!(last_sequence, sequence, "WAL sequence gap");
                    saw_gap = true;
                    self.state.lock().stats.sequence_gaps += 1;
                }

                let entry_type = match WalEntryType::from_u8(type_byte) {
                    Some(t) => t,
                    None => {
                        warn!(type_byte, "unknown WAL entry type, skipping");
                        saw_corruption = true;
                        self.state.lock().stats.corrupted_entries += 1;
                        offset += frame_len;
                        continue;
                    }
                };

                callback(entry_type, sequence, timestamp_ns, payload);

                {
                    let mut state = self.state.lock();
                    state.stats.entries_replayed += 1;
                    state.stats.bytes_replayed += frame_len as u64;
                }

                last_sequence = sequence;
                offset += frame_len;
            }
        }

        let mut state = self.state.lock();
        // Continue from the highest replayed sequence, never from the
        // filename alone: a long tail in the last file would otherwise
        // collide on the next write.
        if last_sequence > state.sequence {
            state.sequence = last_sequence;
            state.stats.current_sequence = last_sequence;
        }
        if saw_corruption || saw_gap {
            state.healthy = false;
            state.stats.healthy = false;
        }
        Ok(())
    }

    /// Replay directly into an order store. Deserializers enforce the
    /// store's duplicate-id and monotonic-timestamp guards, so replaying
    /// checkpoint + tail equals replaying only the tail after the
    /// checkpoint.
    pub fn replay_into(&self, store: &OrderStore) -> Result<(), WalError> {
        self.replay(|entry_type, sequence, ts_ns, payload| match entry_type {
            WalEntryType::OrderNew => {
                if decode_order_new_into(payload, store, ts_ns).is_none() {
                    warn!(sequence, "undecodable OrderNew frame");
                }
            }
            WalEntryType::OrderUpdate => {
                if decode_order_update_into(payload, store).is_none() {
                    warn!(sequence, "undecodable OrderUpdate frame");
                }
            }
            WalEntryType::OrderFill => {
                if decode_order_fill_into(payload, store).is_none() {
                    warn!(sequence, "undecodable OrderFill frame");
                }
            }
            WalEntryType::OrderCancel => {
                if decode_order_cancel_into(payload, store).is_none() {
                    warn!(sequence, "undecodable OrderCancel frame");
                }
            }
            WalEntryType::Checkpoint => {
                if decode_checkpoint_into(payload, store).is_none() {
                    warn!(sequence, "undecodable Checkpoint frame");
                }
            }
            WalEntryType::Rotation => {}
        })
    }
}

// -------------------------------------------------------------------
// Payload codecs: u32-length-prefixed strings + fixed-width LE scalars
// -------------------------------------------------------------------

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn put_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.offset + n > self.buf.len() {
            return None;
        }
        let slice = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Some(slice)
    }

    fn get_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn get_u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes(b.try_into().unwrap()))
    }

    fn get_f64(&mut self) -> Option<f64> {
        self.take(8).map(|b| f64::from_le_bytes(b.try_into().unwrap()))
    }

    fn get_i64(&mut self) -> Option<i64> {
        self.take(8).map(|b| i64::from_le_bytes(b.try_into().unwrap()))
    }

    fn get_str(&mut self) -> Option<String> {
        let len = self.get_u32()? as usize;
        let bytes = self.take(len)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }
}

fn encode_order_new(request: &PlaceOrderRequest) -> Vec<u8> {
    let mut buf = Vec::new();
    put_str(&mut buf, &request.client_order_id);
    put_str(&mut buf, request.symbol.as_str());
    buf.push(match request.side {
        Side::Buy => 0,
        Side::Sell => 1,
    });
    buf.push(request.order_type.as_u8());
    buf.push(request.tif.as_u8());
    put_f64(&mut buf, request.qty);
    match request.price {
        Some(price) => {
            buf.push(1);
            put_f64(&mut buf, price);
        }
        None => {
            buf.push(0);
            put_f64(&mut buf, 0.0);
        }
    }
    buf
}

fn encode_order_update(
    client_order_id: &str,
    venue_order_id: &str,
    status: OrderStatus,
    reason: &str,
    ts_ns: i64,
) -> Vec<u8> {
    let mut buf = Vec::new();
    put_str(&mut buf, client_order_id);
    put_str(&mut buf, venue_order_id);
    put_str(&mut buf, status.as_str());
    put_str(&mut buf, reason);
    put_i64(&mut buf, ts_ns);
    buf
}

fn encode_order_fill(
    client_order_id: &str,
    symbol: &Symbol,
    qty: f64,
    price: f64,
    ts_ns: i64,
) -> Vec<u8> {
    let mut buf = Vec::new();
    put_str(&mut buf, client_order_id);
    put_str(&mut buf, symbol.as_str());
    put_f64(&mut buf, qty);
    put_f64(&mut buf, price);
    put_i64(&mut buf, ts_ns);
    buf
}

fn encode_order_cancel(client_order_id: &str, reason: &str, ts_ns: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    put_str(&mut buf, client_order_id);
    put_str(&mut buf, reason);
    put_i64(&mut buf, ts_ns);
    buf
}

fn encode_checkpoint(orders: &[Order]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(orders.len() as u32).to_le_bytes());
    for order in orders {
        put_str(&mut buf, &order.client_order_id);
        put_str(&mut buf, order.symbol.as_str());
        put_str(&mut buf, order.side.map_or("", |s| s.as_str()));
        match order.order_qty {
            Some(qty) => {
                buf.push(1);
                put_f64(&mut buf, qty);
            }
            None => {
                buf.push(0);
                put_f64(&mut buf, 0.0);
            }
        }
        match order.limit_price {
            Some(price) => {
                buf.push(1);
                put_f64(&mut buf, price);
            }
            None => {
                buf.push(0);
                put_f64(&mut buf, 0.0);
            }
        }
        put_f64(&mut buf, order.executed_qty);
        put_f64(&mut buf, order.avg_price);
        put_str(&mut buf, &order.venue_order_id);
        put_str(&mut buf, order.status.as_str());
        put_str(&mut buf, &order.reason);
        put_i64(&mut buf, order.last_ts_ns);
        put_i64(&mut buf, order.created_ts_ns);
    }
    buf
}

fn decode_order_new_into(payload: &[u8], store: &OrderStore, entry_ts_ns: i64) -> Option<()> {
    let mut r = Reader::new(payload);
    let client_order_id = r.get_str()?;
    let symbol = r.get_str()?;
    let side = r.get_u8()?;
    let order_type = r.get_u8()?;
    let tif = r.get_u8()?;
    let qty = r.get_f64()?;
    let has_price = r.get_u8()?;
    let price = r.get_f64()?;

    if client_order_id.is_empty() {
        return Some(());
    }
    if store.contains(&client_order_id) {
        warn!(%client_order_id, "skipping duplicate OrderNew during replay");
        return Some(());
    }

    let request = PlaceOrderRequest {
        symbol: Symbol::new(symbol),
        side: if side == 1 { Side::Sell } else { Side::Buy },
        order_type: OrderType::from_u8(order_type),
        tif: TimeInForce::from_u8(tif),
        qty,
        price: (has_price == 1).then_some(price),
        client_order_id,
        reduce_only: false,
        post_only: false,
    };
    store.note_order_params(&request, entry_ts_ns);
    Some(())
}

fn decode_order_update_into(payload: &[u8], store: &OrderStore) -> Option<()> {
    let mut r = Reader::new(payload);
    let client_order_id = r.get_str()?;
    let venue_order_id = r.get_str()?;
    let status = r.get_str()?;
    let reason = r.get_str()?;
    let ts_ns = r.get_i64()?;

    if client_order_id.is_empty() {
        return Some(());
    }
    let status = OrderStatus::from_str(&status)?;
    store.apply_order_update(&client_order_id, &venue_order_id, status, &reason, ts_ns);
    Some(())
}

fn decode_order_fill_into(payload: &[u8], store: &OrderStore) -> Option<()> {
    let mut r = Reader::new(payload);
    let client_order_id = r.get_str()?;
    let symbol = r.get_str()?;
    let qty = r.get_f64()?;
    let price = r.get_f64()?;
    let ts_ns = r.get_i64()?;

    if client_order_id.is_empty() {
        return Some(());
    }
    if let Err(e) = store.apply_fill(&client_order_id, &Symbol::new(symbol), qty, price, ts_ns) {
        error!(%client_order_id, error = %e, "fill rejected during replay");
    }
    Some(())
}

fn decode_order_cancel_into(payload: &[u8], store: &OrderStore) -> Option<()> {
    let mut r = Reader::new(payload);
    let client_order_id = r.get_str()?;
    let reason = r.get_str()?;
    let ts_ns = r.get_i64()?;

    if client_order_id.is_empty() {
        return Some(());
    }
    store.apply_order_update(&client_order_id, "", OrderStatus::Canceled, &reason, ts_ns);
    Some(())
}

fn decode_checkpoint_into(payload: &[u8], store: &OrderStore) -> Option<()> {
    // A checkpoint rebuilds the store standalone.
    store.clear();

    let mut r = Reader::new(payload);
    let count = r.get_u32()?;
    for _ in 0..count {
        let client_order_id = r.get_str()?;
        let symbol = r.get_str()?;
        let side = r.get_str()?;
        let has_qty = r.get_u8()?;
        let order_qty = r.get_f64()?;
        let has_price = r.get_u8()?;
        let limit_price = r.get_f64()?;
        let executed_qty = r.get_f64()?;
        let avg_price = r.get_f64()?;
        let venue_order_id = r.get_str()?;
        let status = r.get_str()?;
        let reason = r.get_str()?;
        let last_ts_ns = r.get_i64()?;
        let created_ts_ns = r.get_i64()?;

        store.restore(Order {
            client_order_id,
            symbol: Symbol::new(symbol),
            side: Side::from_str(&side),
            order_qty: (has_qty == 1).then_some(order_qty),
            limit_price: (has_price == 1).then_some(limit_price),
            executed_qty,
            avg_price,
            venue_order_id,
            status: OrderStatus::from_str(&status).unwrap_or(OrderStatus::New),
            reason,
            last_ts_ns,
            created_ts_ns,
        });
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn wal_config(dir: &TempDir) -> WalConfig {
        WalConfig {
            directory: dir.path().to_path_buf(),
            ..WalConfig::default()
        }
    }

    fn buy_request(id: &str, qty: f64, price: f64) -> PlaceOrderRequest {
        PlaceOrderRequest::limit("BTCUSDT", Side::Buy, qty, price, id)
    }

    #[test]
    fn test_write_and_replay_roundtrip() {
        let dir = TempDir::new().unwrap();
        {
            let wal = OrderWal::new(wal_config(&dir)).unwrap();
            wal.log_order_new(&buy_request("o1", 1.0, 50_000.0)).unwrap();
            wal.log_order_update("o1", "v1", OrderStatus::Accepted, "", 100)
                .unwrap();
            wal.log_order_fill("o1", &Symbol::from("BTCUSDT"), 1.0, 50_000.0, 200)
                .unwrap();
        }

        let wal = OrderWal::new(wal_config(&dir)).unwrap();
        let store = OrderStore::new();
        wal.replay_into(&store).unwrap();

        let order = store.get("o1").unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.executed_qty, 1.0);
        assert_eq!(order.avg_price, 50_000.0);
        assert_eq!(order.venue_order_id, "v1");
        assert!(wal.is_healthy());
        assert_eq!(wal.stats().entries_replayed, 3);
    }

    #[test]
    fn test_sequences_strictly_increase() {
        let dir = TempDir::new().unwrap();
        let wal = OrderWal::new(wal_config(&dir)).unwrap();
        let s1 = wal.log_order_new(&buy_request("a", 1.0, 1.0)).unwrap();
        let s2 = wal.log_order_new(&buy_request("b", 1.0, 1.0)).unwrap();
        let s3 = wal.log_order_cancel("a", "user", 10).unwrap();
        assert!(s1 < s2 && s2 < s3);
    }

    #[test]
    fn test_writer_resumes_after_replayed_tail() {
        let dir = TempDir::new().unwrap();
        let last_seq;
        {
            let wal = OrderWal::new(wal_config(&dir)).unwrap();
            for i in 0..5 {
                wal.log_order_new(&buy_request(&format!("o{}", i), 1.0, 1.0))
                    .unwrap();
            }
            last_seq = wal.current_sequence();
        }

        // The single file is named for sequence 0; replay must move the
        // writer past the tail so new frames do not collide.
        let wal = OrderWal::new(wal_config(&dir)).unwrap();
        let store = OrderStore::new();
        wal.replay_into(&store).unwrap();
        assert_eq!(wal.current_sequence(), last_seq);

        let next = wal.log_order_cancel("o0", "user", 99).unwrap();
        assert_eq!(next, last_seq + 1);
    }

    #[test]
    fn test_replay_idempotent() {
        let dir = TempDir::new().unwrap();
        {
            let wal = OrderWal::new(wal_config(&dir)).unwrap();
            wal.log_order_new(&buy_request("o1", 2.0, 10.0)).unwrap();
            wal.log_order_fill("o1", &Symbol::from("BTCUSDT"), 1.0, 10.0, 100)
                .unwrap();
            wal.log_order_fill("o1", &Symbol::from("BTCUSDT"), 1.0, 12.0, 200)
                .unwrap();
        }

        let wal = OrderWal::new(wal_config(&dir)).unwrap();
        let store = OrderStore::new();
        wal.replay_into(&store).unwrap();
        let once = store.get("o1").unwrap();

        // Replaying again must not double-apply: the timestamp guard
        // rejects every already-applied record.
        wal.replay_into(&store).unwrap();
        let twice = store.get("o1").unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.executed_qty, 2.0);
        assert_eq!(twice.avg_price, 11.0);
    }

    #[test]
    fn test_corrupt_payload_skipped_and_flagged() {
        let dir = TempDir::new().unwrap();
        {
            let wal = OrderWal::new(wal_config(&dir)).unwrap();
            wal.log_order_new(&buy_request("o1", 1.0, 10.0)).unwrap();
            wal.log_order_new(&buy_request("o2", 1.0, 10.0)).unwrap();
        }

        // Flip a byte inside the first frame's payload.
        let file = dir
            .path()
            .read_dir()
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let mut data = fs::read(&file).unwrap();
        data[WAL_HEADER_LEN + 6] ^= 0xFF;
        fs::write(&file, &data).unwrap();

        let wal = OrderWal::new(wal_config(&dir)).unwrap();
        let store = OrderStore::new();
        wal.replay_into(&store).unwrap();

        assert!(store.get("o1").is_none());
        assert!(store.get("o2").is_some());
        assert!(!wal.is_healthy());
        assert_eq!(wal.stats().corrupted_entries, 1);
    }

    #[test]
    fn test_truncated_tail_stops_file() {
        let dir = TempDir::new().unwrap();
        {
            let wal = OrderWal::new(wal_config(&dir)).unwrap();
            wal.log_order_new(&buy_request("o1", 1.0, 10.0)).unwrap();
            wal.log_order_new(&buy_request("o2", 1.0, 10.0)).unwrap();
        }

        let file = dir
            .path()
            .read_dir()
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let data = fs::read(&file).unwrap();
        fs::write(&file, &data[..data.len() - 5]).unwrap();

        let wal = OrderWal::new(wal_config(&dir)).unwrap();
        let store = OrderStore::new();
        wal.replay_into(&store).unwrap();

        assert!(store.get("o1").is_some());
        assert!(store.get("o2").is_none());
        assert!(!wal.is_healthy());
    }

    #[test]
    fn test_rotation_and_retention() {
        let dir = TempDir::new().unwrap();
        let config = WalConfig {
            directory: dir.path().to_path_buf(),
            max_file_size: 256,
            max_files: 3,
            ..WalConfig::default()
        };
        let wal = OrderWal::new(config).unwrap();
        for i in 0..50 {
            wal.log_order_new(&buy_request(&format!("order-{}", i), 1.0, 10.0))
                .unwrap();
        }
        assert!(wal.stats().rotations > 0);

        let files: Vec<_> = dir
            .path()
            .read_dir()
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(files.len() <= 3, "retention kept {} files", files.len());
    }

    #[test]
    fn test_checkpoint_collapses_prefix() {
        let dir = TempDir::new().unwrap();
        {
            let wal = OrderWal::new(wal_config(&dir)).unwrap();
            let store = OrderStore::new();
            for i in 0..3 {
                let req = buy_request(&format!("o{}", i), 1.0, 10.0);
                wal.log_order_new(&req).unwrap();
                store.note_order_params(&req, 1 + i);
            }
            store
                .apply_fill("o0", &Symbol::from("BTCUSDT"), 1.0, 10.0, 50)
                .unwrap();
            wal.log_order_fill("o0", &Symbol::from("BTCUSDT"), 1.0, 10.0, 50)
                .unwrap();
            wal.write_checkpoint(&store).unwrap();
            // Tail after checkpoint
            wal.log_order_update("o1", "v1", OrderStatus::Accepted, "", 100)
                .unwrap();
        }

        let wal = OrderWal::new(wal_config(&dir)).unwrap();
        let store = OrderStore::new();
        wal.replay_into(&store).unwrap();

        assert_eq!(store.count(), 3);
        assert_eq!(store.get("o0").unwrap().status, OrderStatus::Filled);
        assert_eq!(store.get("o1").unwrap().status, OrderStatus::Accepted);
        assert_eq!(store.get("o1").unwrap().venue_order_id, "v1");
    }

    #[test]
    fn test_needs_checkpoint_counter() {
        let dir = TempDir::new().unwrap();
        let config = WalConfig {
            directory: dir.path().to_path_buf(),
            checkpoint_interval: 5,
            ..WalConfig::default()
        };
        let wal = OrderWal::new(config).unwrap();
        for i in 0..4 {
            wal.log_order_cancel(&format!("o{}", i), "", 10 + i as i64)
                .unwrap();
        }
        assert!(!wal.needs_checkpoint());
        wal.log_order_cancel("o5", "", 20).unwrap();
        assert!(wal.needs_checkpoint());

        let store = OrderStore::new();
        wal.write_checkpoint(&store).unwrap();
        assert!(!wal.needs_checkpoint());
    }
}
