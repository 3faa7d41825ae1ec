//! Sale collection from the explorer's NFT transfer history.
//!
//! Transfers are paged from the explorer in ascending block order. Each one is
//! cross-checked against the chain: only transfers whose transaction carried a
//! nonzero value (sales) are kept, with the explorer's `value` replaced by the
//! on-chain one. The next page starts at the last block seen, so transfers of
//! that boundary block arrive twice and are filtered the second time, once
//! per occurrence already handled.

use crate::collection::{Collection, CollectionError};
use crate::explorer::{TransferPage, TransferQuery, MAX_TRANSFERS_PER_PAGE};
use crate::schemas::{
    PaginationEnd, SkippedTransfer, TokenTransfer, TransactionRecord, TransactionReport,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Occurrences of each transfer key within one block.
type KeyCounts = HashMap<String, usize>;

impl Collection {
    /// Parse sales between `start_block` and `end_block` (chain head when
    /// `None`), requesting `transactions_step` transfers per explorer call.
    ///
    /// Everything appended before a fatal error stays in the accumulator.
    pub async fn parse_transactions(
        &mut self,
        transactions_step: usize,
        start_block: u64,
        end_block: Option<u64>,
    ) -> Result<TransactionReport, CollectionError> {
        if transactions_step > MAX_TRANSFERS_PER_PAGE {
            return Err(CollectionError::Validation(format!(
                "transaction step {} is larger than the explorer maximum of {}",
                transactions_step, MAX_TRANSFERS_PER_PAGE
            )));
        }
        if transactions_step == 0 {
            return Err(CollectionError::Validation(
                "transaction step must be at least 1".to_string(),
            ));
        }

        let end_block = match end_block {
            Some(block) => block,
            None => self.backends.chain.block_number().await?,
        };

        let started_at = Utc::now();
        let mut report = TransactionReport {
            start_block,
            end_block,
            pages: 0,
            appended: 0,
            zero_value_dropped: 0,
            skipped: Vec::new(),
            end: PaginationEnd::Exhausted,
            started_at,
            finished_at: started_at,
        };

        if start_block > end_block {
            warn!(
                "Start block {} is after end block {}, nothing to parse",
                start_block, end_block
            );
            return Ok(report);
        }

        info!(
            "Parsing sales in blocks {} to {} ({} transfers per page)",
            start_block, end_block, transactions_step
        );

        let mut page_start = start_block;
        // Transfers of `page_start` that the previous page already handled.
        let mut boundary = KeyCounts::new();

        loop {
            let query = TransferQuery {
                contract: self.address,
                start_block: page_start,
                end_block,
                offset: transactions_step,
            };

            let records = match self.backends.explorer.token_transfers(&query).await? {
                TransferPage::Page(records) => records,
                TransferPage::Exhausted => {
                    info!(
                        "Explorer reports no more transfers from block {}",
                        page_start
                    );
                    report.end = PaginationEnd::Exhausted;
                    break;
                }
                TransferPage::ExplorerError(reason) => {
                    warn!(
                        "Explorer failed at block {} after {} sales: {}",
                        page_start, report.appended, reason
                    );
                    return Err(CollectionError::PaginationFailed(reason));
                }
            };

            report.pages += 1;
            let full_page = records.len() >= transactions_step;
            debug!(
                "Page {} from block {}: {} transfers ({:.1}% of range)",
                report.pages,
                page_start,
                records.len(),
                progress(start_block, page_start, end_block)
            );

            let mut last_block: Option<u64> = None;
            let mut last_block_keys = KeyCounts::new();

            for raw in records {
                let transfer = match TokenTransfer::parse(raw.clone()) {
                    Ok(transfer) => transfer,
                    Err(reason) => {
                        let hash = raw.get("hash").and_then(Value::as_str).map(str::to_string);
                        warn!("Skipping malformed transfer {:?}: {}", hash, reason);
                        report.skipped.push(SkippedTransfer { hash, reason });
                        continue;
                    }
                };

                let key = transfer.transfer_key();
                if transfer.block_number == page_start {
                    if let Some(remaining) = boundary.get_mut(&key).filter(|n| **n > 0) {
                        *remaining -= 1;
                        debug!("Transfer {} already handled on the previous page", transfer.hash);
                        continue;
                    }
                }

                if last_block != Some(transfer.block_number) {
                    last_block = Some(transfer.block_number);
                    last_block_keys.clear();
                }
                *last_block_keys.entry(key).or_insert(0) += 1;

                self.record_sale(transfer, &mut report).await?;
            }

            if !full_page {
                warn!("Parser has reached the end of transactions.");
                report.end = PaginationEnd::ShortPage;
                break;
            }

            let next_start = match last_block {
                Some(block) if block > page_start => Some(block),
                _ => {
                    // A full page inside one block would be requested forever.
                    warn!(
                        "Page of {} transfers did not advance past block {}; continuing with the next block",
                        transactions_step, page_start
                    );
                    page_start.checked_add(1)
                }
            };

            let next_start = match next_start {
                Some(block) if block <= end_block => block,
                _ => {
                    report.end = PaginationEnd::Exhausted;
                    break;
                }
            };

            boundary = if Some(next_start) == last_block {
                last_block_keys
            } else {
                KeyCounts::new()
            };
            page_start = next_start;
        }

        report.finished_at = Utc::now();
        info!(
            "Parsed {} sales over {} pages ({} zero-value transfers dropped, {} total accumulated)",
            report.appended,
            report.pages,
            report.zero_value_dropped,
            self.transactions.len()
        );
        Ok(report)
    }

    /// Look up the authoritative value of one transfer and keep it if nonzero.
    async fn record_sale(
        &mut self,
        transfer: TokenTransfer,
        report: &mut TransactionReport,
    ) -> Result<(), CollectionError> {
        match self.backends.chain.transaction_value(transfer.hash).await? {
            None => {
                warn!("Transaction {} is unknown to the provider, skipping", transfer.hash);
                report.skipped.push(SkippedTransfer {
                    hash: Some(format!("{:?}", transfer.hash)),
                    reason: "transaction not found on chain".to_string(),
                });
            }
            Some(value) if value.is_zero() => {
                report.zero_value_dropped += 1;
            }
            Some(value) => {
                self.transactions
                    .push(TransactionRecord::from_transfer(transfer, value));
                report.appended += 1;
            }
        }
        Ok(())
    }
}

fn progress(first: u64, current: u64, last: u64) -> f64 {
    if last <= first {
        return 100.0;
    }
    (current - first) as f64 / (last - first) as f64 * 100.0
}
