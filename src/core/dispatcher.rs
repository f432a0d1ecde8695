use crate::core::strategies::{self, ExtractionContext};
use crate::core::{Fetch, PageSink};
use crate::domain::model::{ApiType, Credentials, EndpointDescriptor, Outcome};
use chrono::NaiveDate;

/// Single entry point of the extraction engine: picks the strategy for a
/// descriptor's shape and drives it to an [`Outcome`].
pub struct ExtractionDispatcher<F: Fetch> {
    fetcher: F,
    run_date: NaiveDate,
}

impl<F: Fetch> ExtractionDispatcher<F> {
    pub fn new(fetcher: F, run_date: NaiveDate) -> Self {
        Self { fetcher, run_date }
    }

    pub fn run_date(&self) -> NaiveDate {
        self.run_date
    }

    pub async fn run<S: PageSink>(
        &self,
        descriptor: &EndpointDescriptor,
        credentials: &Credentials,
        sink: &S,
    ) -> Outcome {
        tracing::info!(
            "▶️ {}: extracting as {} ({} auth)",
            descriptor.endpoint_name,
            descriptor.api_type,
            descriptor.auth_type
        );

        let mut ctx = ExtractionContext::new(
            &self.fetcher,
            sink,
            descriptor,
            credentials,
            self.run_date,
        );

        // 新形狀：加 enum variant 與對應 strategy
        let result = match descriptor.api_type {
            ApiType::JsonTokenPagedCount => strategies::json_token_paged_count(&mut ctx).await,
            ApiType::JsonUserPassPagedNext => strategies::json_user_pass_paged_next(&mut ctx).await,
            ApiType::JsonUserPassPagedCount => {
                strategies::json_user_pass_paged_count(&mut ctx).await
            }
            ApiType::JsonUserPassNotPaged => strategies::json_user_pass_not_paged(&mut ctx).await,
            ApiType::JsonApiKeyNotPaged => strategies::json_api_key_not_paged(&mut ctx).await,
            ApiType::XmlUserPassNotPaged => strategies::xml_user_pass_not_paged(&mut ctx).await,
            ApiType::CsvNotPaged => strategies::csv_not_paged(&mut ctx).await,
        };
        let report = ctx.report;

        match result {
            Ok(()) => {
                tracing::info!(
                    "✅ {}: {} page(s) written",
                    descriptor.endpoint_name,
                    report.pages_written
                );
                Outcome::Success(report)
            }
            Err(error) => {
                tracing::warn!(
                    "❌ {}: {} after {} page(s) (last page: {:?})",
                    descriptor.endpoint_name,
                    error,
                    report.pages_written,
                    report.last_page
                );
                Outcome::Failure { error, report }
            }
        }
    }
}
