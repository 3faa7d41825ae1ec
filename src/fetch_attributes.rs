//! Attribute collection over a token-id range.
//!
//! Walks ids one by one against the collection's metadata endpoint. Sparse and
//! burned tokens are normal, so per-id failures are logged and skipped rather
//! than aborting the run.

use crate::collection::{Collection, CollectionError};
use crate::ethereum::u256_to_u64;
use crate::metadata::{MetadataError, MetadataUrlTemplate};
use crate::schemas::{AttributeRecord, AttributeReport, AttributeShapeError, SkipReason, SkippedToken};
use chrono::Utc;
use tracing::{debug, info, warn};

/// Token id whose URI is used to derive the metadata URL template.
const TEMPLATE_TOKEN_ID: u64 = 1;

const MAX_TOKENS_FN: &str = "maxTokens";
const TOTAL_SUPPLY_FN: &str = "totalSupply";

impl Collection {
    /// Parse attributes of token ids `start..=end`, appending one record per
    /// successfully parsed id. `end` defaults to the contract's `maxTokens`,
    /// or `totalSupply` when the contract has no `maxTokens`.
    ///
    /// Records keep append order; the `Name` trait identifies the token.
    pub async fn parse_attributes(
        &mut self,
        start: u64,
        end: Option<u64>,
    ) -> Result<AttributeReport, CollectionError> {
        let end = match end {
            Some(end) => end,
            None => self.resolve_last_token_id().await?,
        };

        let mut report = AttributeReport::begin(start, end);
        if start > end {
            warn!("Empty token id range {}..={}, nothing to parse", start, end);
            return Ok(report);
        }

        let template = self.metadata_template().await?;
        info!("Parsing attributes for token ids {}..={}", start, end);

        let mut next = start;
        if start == 0 {
            // Many collections start at id 1; a bad id 0 is expected there.
            match self.fetch_record(&template, 0).await {
                Ok(record) => self.push_attributes(record, &mut report),
                Err(SkipReason::Decode(detail)) => {
                    warn!("The NFT collection starts from id #1, not id #0 ({})", detail);
                    report.skipped.push(SkippedToken {
                        token_id: 0,
                        reason: SkipReason::StartsAtOne,
                    });
                }
                Err(reason) => skip_token(&mut report, 0, reason),
            }
            next = 1;
        }

        for token_id in next..=end {
            match self.fetch_record(&template, token_id).await {
                Ok(record) => self.push_attributes(record, &mut report),
                Err(reason) => skip_token(&mut report, token_id, reason),
            }
        }

        report.finished_at = Utc::now();
        info!(
            "Parsed {} token attributes ({} ids skipped, {} total accumulated)",
            report.appended,
            report.skipped.len(),
            self.attributes.len()
        );
        Ok(report)
    }

    async fn metadata_template(&self) -> Result<MetadataUrlTemplate, CollectionError> {
        let token_uri = self.contract().token_uri(TEMPLATE_TOKEN_ID).await?;
        let template = MetadataUrlTemplate::from_token_uri(&token_uri, &self.ipfs_gateway)
            .ok_or_else(|| {
                CollectionError::Configuration(format!(
                    "token URI {:?} does not end with a token id",
                    token_uri
                ))
            })?;
        debug!("Metadata template from {:?}: {:?}", token_uri, template);
        Ok(template)
    }

    /// Last token id, chosen by what the contract's interface declares.
    async fn resolve_last_token_id(&self) -> Result<u64, CollectionError> {
        let contract = self.contract();
        let (function, count) = if contract.supports(MAX_TOKENS_FN) {
            (MAX_TOKENS_FN, contract.max_tokens().await?)
        } else if contract.supports(TOTAL_SUPPLY_FN) {
            (TOTAL_SUPPLY_FN, contract.total_supply().await?)
        } else {
            return Err(CollectionError::Configuration(format!(
                "contract declares neither {} nor {}; pass an explicit end id",
                MAX_TOKENS_FN, TOTAL_SUPPLY_FN
            )));
        };

        let last = u256_to_u64(count).ok_or_else(|| {
            CollectionError::Configuration(format!("{} returned {} which is not a u64", function, count))
        })?;
        info!("Resolved last token id {} from {}()", last, function);
        Ok(last)
    }

    async fn fetch_record(
        &self,
        template: &MetadataUrlTemplate,
        token_id: u64,
    ) -> Result<AttributeRecord, SkipReason> {
        let url = template.url_for(token_id);
        let doc = self
            .backends
            .metadata
            .fetch(&url)
            .await
            .map_err(|e| match e {
                MetadataError::Transport(detail) => SkipReason::TransportAborted(detail),
                MetadataError::Decode(detail) => SkipReason::Decode(detail),
            })?;

        AttributeRecord::from_metadata(&doc).map_err(|e| match e {
            AttributeShapeError::MissingAttributes => SkipReason::MissingAttributes,
            AttributeShapeError::MissingName => SkipReason::MissingName,
        })
    }

    fn push_attributes(&mut self, record: AttributeRecord, report: &mut AttributeReport) {
        self.attributes.push(record);
        report.appended += 1;
    }
}

fn skip_token(report: &mut AttributeReport, token_id: u64, reason: SkipReason) {
    match &reason {
        SkipReason::MissingAttributes => {
            warn!("Token #{}: the parsed json does not contain attributes", token_id)
        }
        SkipReason::MissingName => {
            warn!("Token #{}: the parsed json does not contain a name", token_id)
        }
        SkipReason::TransportAborted(detail) => warn!(
            "Token #{}: the connection has aborted, most likely the real number of tokens is less than the total supply ({})",
            token_id, detail
        ),
        SkipReason::Decode(detail) => warn!(
            "Token #{}: json has not been found, most likely the parser has reached the end ({})",
            token_id, detail
        ),
        SkipReason::StartsAtOne => {}
    }
    report.skipped.push(SkippedToken { token_id, reason });
}
