use std::fs;
use std::io::{BufWriter, Write};
use std::ops::ControlFlow;
use std::path::Path;

use serde::Serialize;

use ledger_core::{Block, BlockHash, LedgerError, EXPORT_WARN_BLOCK_COUNT, HASH_ALGORITHM, SIGNATURE_ALGORITHM};

use crate::chain::ChainEngine;

/// Wire format: JSON Lines. One header line, one line per authorized-key
/// record (including revoked/historical ones), one line per block in
/// number order. Each line is tagged with `kind` so a reader can dispatch
/// without buffering the whole document, which is what keeps both export
/// and import memory proportional to one record at a time rather than to
/// chain length.
#[derive(Serialize)]
pub struct ExportHeader {
    pub kind: &'static str,
    pub version: u32,
    pub exported_at: i64,
    pub block_count: u64,
    pub genesis_hash: BlockHash,
    pub hash_algorithm: &'static str,
    pub signature_algorithm: &'static str,
}

#[derive(Serialize)]
struct ExportedKeyLine<'a> {
    kind: &'static str,
    #[serde(flatten)]
    record: &'a ledger_core::AuthorizedKey,
}

#[derive(Serialize)]
struct ExportedOffChainRef {
    id: String,
    ciphertext_hash: BlockHash,
    plaintext_size: u64,
    signature: ledger_core::DilithiumSignature,
    created_at: i64,
    encryption_nonce: [u8; 12],
}

#[derive(Serialize)]
struct ExportedBlockLine<'a> {
    kind: &'static str,
    number: u64,
    timestamp: i64,
    data: &'a str,
    previous_hash: BlockHash,
    hash: BlockHash,
    signature: &'a ledger_core::DilithiumSignature,
    signer_public_key: ledger_core::KeyFingerprint,
    off_chain_ref: Option<ExportedOffChainRef>,
    is_encrypted: bool,
    auto_keywords: &'a [String],
    category: ledger_core::Category,
    custom_metadata: &'a std::collections::BTreeMap<String, serde_json::Value>,
}

/// Streams the chain to `path` as JSON Lines: a header, the full
/// authorized-key history, then every block in number order. Each block's
/// off-chain sidecar, if any, is copied into `<path's-parent>/offchain/`
/// under a filename equal to its ciphertext hash, during the same pass —
/// peak memory stays proportional to one block, not the chain length.
pub fn export_chain(engine: &ChainEngine, path: &Path, exported_at: i64) -> Result<u64, LedgerError> {
    export_chain_prefix(engine, path, exported_at, None)
}

/// Like `export_chain`, but stops after `up_to_inclusive` (when given)
/// rather than exporting the whole chain. Used by `RecoveryManager`'s
/// partial-export strategy to archive only the longest valid prefix of a
/// corrupted chain.
pub fn export_chain_prefix(engine: &ChainEngine, path: &Path, exported_at: i64, up_to_inclusive: Option<u64>) -> Result<u64, LedgerError> {
    let total = match up_to_inclusive {
        Some(n) => (n + 1).min(engine.db().count_blocks()),
        None => engine.db().count_blocks(),
    };
    if total > EXPORT_WARN_BLOCK_COUNT {
        tracing::warn!(block_count = total, "exporting a chain above the size threshold where export time grows noticeably");
    }

    let offchain_dir = path.parent().unwrap_or_else(|| Path::new(".")).join("offchain");
    fs::create_dir_all(&offchain_dir).map_err(|e| LedgerError::StorageError(e.to_string()))?;

    let file = fs::File::create(path).map_err(|e| LedgerError::StorageError(e.to_string()))?;
    let mut writer = BufWriter::new(file);

    let genesis_hash = engine.db().find_block_by_number(0)?.map(|b| b.hash).unwrap_or(BlockHash::ZERO);
    let header = ExportHeader {
        kind: "header",
        version: 1,
        exported_at,
        block_count: total,
        genesis_hash,
        hash_algorithm: HASH_ALGORITHM,
        signature_algorithm: SIGNATURE_ALGORITHM,
    };
    write_line(&mut writer, &header)?;

    for record in engine.db().iter_all_key_records()? {
        write_line(&mut writer, &ExportedKeyLine { kind: "key", record: &record })?;
    }

    let mut export_err: Option<LedgerError> = None;
    engine.db().stream_all_blocks(|block| {
        if let Some(limit) = up_to_inclusive {
            if block.number > limit {
                return ControlFlow::Break(());
            }
        }
        if let Err(e) = export_one_block(&mut writer, &block, &offchain_dir, engine) {
            export_err = Some(e);
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    })?;
    if let Some(e) = export_err {
        return Err(e);
    }

    writer.flush().map_err(io_err)?;
    Ok(total)
}

fn export_one_block(writer: &mut impl Write, block: &Block, offchain_dir: &Path, engine: &ChainEngine) -> Result<(), LedgerError> {
    let off_chain_ref = match &block.off_chain_ref {
        None => None,
        Some(r) => {
            let record = engine
                .offchain()
                .get_record(&r.id)?
                .ok_or_else(|| LedgerError::OffChainUnavailable(r.id.clone()))?;
            let src = engine.offchain().root_path().join(&record.file_path);
            // `r.id` is already the ciphertext hash hex (see ledger-offchain's
            // `OffChainStore::write`), so it round-trips through import unchanged
            // and the re-hashed block body matches the original on re-validation.
            let dst = offchain_dir.join(format!("{}.bin", r.id));
            fs::copy(&src, &dst).map_err(|e| LedgerError::OffChainUnavailable(e.to_string()))?;
            Some(ExportedOffChainRef {
                id: r.id.clone(),
                ciphertext_hash: r.ciphertext_hash,
                plaintext_size: record.plaintext_size,
                signature: record.signature,
                created_at: record.created_at,
                encryption_nonce: record.encryption_nonce,
            })
        }
    };

    write_line(
        writer,
        &ExportedBlockLine {
            kind: "block",
            number: block.number,
            timestamp: block.timestamp,
            data: &block.data,
            previous_hash: block.previous_hash,
            hash: block.hash,
            signature: &block.signature,
            signer_public_key: block.signer_public_key,
            off_chain_ref,
            is_encrypted: block.is_encrypted,
            auto_keywords: &block.auto_keywords,
            category: block.category,
            custom_metadata: &block.custom_metadata,
        },
    )
}

fn write_line(writer: &mut impl Write, value: &impl Serialize) -> Result<(), LedgerError> {
    serde_json::to_writer(&mut *writer, value).map_err(json_err)?;
    writeln!(writer).map_err(io_err)
}

fn io_err(e: std::io::Error) -> LedgerError {
    LedgerError::StorageError(e.to_string())
}

fn json_err(e: serde_json::Error) -> LedgerError {
    LedgerError::StorageError(format!("export serialization error: {e}"))
}
