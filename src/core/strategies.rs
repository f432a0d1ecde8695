//! Pagination strategies, one per endpoint shape.
//!
//! Every strategy writes one page per successful fetch and returns the
//! first error it meets; nothing is written for the failing fetch.

use crate::core::{Fetch, PageSink};
use crate::domain::model::{
    Credentials, EndpointDescriptor, ExtractionReport, FetchedBody, Page, PageFormat, PageRequest,
    QueryParams,
};
use crate::utils::error::ExtractionError;
use crate::utils::json::{as_page_count, find_first_key, to_canonical_json};
use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};
use serde_json::Value;

type StrategyResult = Result<(), ExtractionError>;

/// State shared by one endpoint extraction.
pub struct ExtractionContext<'a, F: Fetch, S: PageSink> {
    pub fetcher: &'a F,
    pub sink: &'a S,
    pub descriptor: &'a EndpointDescriptor,
    pub credentials: &'a Credentials,
    pub run_date: NaiveDate,
    pub report: ExtractionReport,
}

impl<'a, F: Fetch, S: PageSink> ExtractionContext<'a, F, S> {
    pub fn new(
        fetcher: &'a F,
        sink: &'a S,
        descriptor: &'a EndpointDescriptor,
        credentials: &'a Credentials,
        run_date: NaiveDate,
    ) -> Self {
        Self {
            fetcher,
            sink,
            descriptor,
            credentials,
            run_date,
            report: ExtractionReport::default(),
        }
    }

    async fn get(&self, request: &PageRequest) -> Result<FetchedBody, ExtractionError> {
        self.fetcher
            .get(self.descriptor, self.credentials, request)
            .await
    }

    async fn write(&mut self, page: Option<u32>, format: PageFormat, body: Vec<u8>) -> StrategyResult {
        let page_file = Page {
            content_type: format.content_type().to_string(),
            destination_path: self.descriptor.destination_path.clone(),
            file_name: Page::file_name(
                &self.descriptor.endpoint_name,
                self.run_date,
                page,
                format,
            ),
            body,
        };

        self.sink
            .write_page(&page_file)
            .await
            .map_err(|e| ExtractionError::Storage(e.to_string()))?;

        tracing::info!(
            "💾 {}: wrote {}/{} ({} bytes)",
            self.descriptor.endpoint_name,
            page_file.destination_path,
            page_file.file_name,
            page_file.body.len()
        );
        self.report.pages_written += 1;
        if page.is_some() {
            self.report.last_page = page;
        }
        Ok(())
    }

    async fn write_json(&mut self, page: Option<u32>, value: &Value) -> StrategyResult {
        let body = to_canonical_json(value)
            .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;
        self.write(page, PageFormat::Json, body).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CountLookup {
    TopLevel,
    DepthFirst,
}

fn total_pages(
    descriptor: &EndpointDescriptor,
    body: &Value,
    lookup: CountLookup,
) -> Result<u32, ExtractionError> {
    let key = descriptor.total_pages_key_name.as_deref().ok_or_else(|| {
        ExtractionError::MalformedResponse(format!(
            "{}: total_pages_key_name is not configured",
            descriptor.endpoint_name
        ))
    })?;

    let found = match lookup {
        CountLookup::TopLevel => body.get(key),
        CountLookup::DepthFirst => find_first_key(key, body),
    };

    found.and_then(as_page_count).ok_or_else(|| {
        ExtractionError::MalformedResponse(format!(
            "{}: no page count at '{}'",
            descriptor.endpoint_name, key
        ))
    })
}

fn next_link(body: &Value) -> Option<&str> {
    body.get("d")?.get("__next")?.as_str()
}

/// Token auth, page count found anywhere in the first response.
///
/// The discovery response is only used for its count; pages
/// `first_page_number..total` are then fetched and written.
pub async fn json_token_paged_count<F: Fetch, S: PageSink>(
    ctx: &mut ExtractionContext<'_, F, S>,
) -> StrategyResult {
    let token = ctx
        .fetcher
        .fetch_token(ctx.descriptor, ctx.credentials)
        .await?;
    let base = PageRequest::for_endpoint(ctx.descriptor).with_bearer(token);

    let discovery = ctx.get(&base).await?.json()?;
    let total = total_pages(ctx.descriptor, &discovery, CountLookup::DepthFirst)?;
    tracing::debug!("{}: {} pages reported", ctx.descriptor.endpoint_name, total);

    for page in ctx.descriptor.first_page_number..total {
        let request = base.clone().with_param("page", page.to_string());
        let body = ctx.get(&request).await?.json()?;
        ctx.write_json(Some(page), &body).await?;
    }
    Ok(())
}

/// Basic auth, page count at a top-level key.
///
/// The first page is written as soon as it arrives; the loop then covers
/// `first_page_number..total`, so the first page is fetched a second time
/// and overwritten under the same name.
pub async fn json_user_pass_paged_count<F: Fetch, S: PageSink>(
    ctx: &mut ExtractionContext<'_, F, S>,
) -> StrategyResult {
    let first = ctx.descriptor.first_page_number;
    let base = PageRequest::for_endpoint(ctx.descriptor);

    let body = ctx
        .get(&base.clone().with_param("page", first.to_string()))
        .await?
        .json()?;
    let total = total_pages(ctx.descriptor, &body, CountLookup::TopLevel)?;
    ctx.write_json(Some(first), &body).await?;

    for page in first..total {
        let request = base.clone().with_param("page", page.to_string());
        let body = ctx.get(&request).await?.json()?;
        ctx.write_json(Some(page), &body).await?;
    }
    Ok(())
}

/// Basic auth, follows `d.__next` links. Pages are numbered from 1 in
/// fetch order, whatever the links themselves say.
pub async fn json_user_pass_paged_next<F: Fetch, S: PageSink>(
    ctx: &mut ExtractionContext<'_, F, S>,
) -> StrategyResult {
    let mut request = PageRequest::for_endpoint(ctx.descriptor);
    let mut page = 1;

    loop {
        let body = ctx.get(&request).await?.json()?;
        let next = next_link(&body).map(str::to_string);
        ctx.write_json(Some(page), &body).await?;

        match next {
            Some(url) => {
                request = request.with_url(url);
                page += 1;
            }
            None => return Ok(()),
        }
    }
}

pub async fn json_user_pass_not_paged<F: Fetch, S: PageSink>(
    ctx: &mut ExtractionContext<'_, F, S>,
) -> StrategyResult {
    let request = PageRequest::for_endpoint(ctx.descriptor);
    let body = ctx.get(&request).await?.json()?;
    ctx.write_json(None, &body).await
}

pub async fn json_api_key_not_paged<F: Fetch, S: PageSink>(
    ctx: &mut ExtractionContext<'_, F, S>,
) -> StrategyResult {
    let request = PageRequest::for_endpoint(ctx.descriptor)
        .with_param("registrationkey", ctx.credentials.password.clone());
    let body = ctx.get(&request).await?.json()?;
    ctx.write_json(None, &body).await
}

/// The body must be well-formed XML; it is written re-serialized, without
/// the XML declaration, comments or processing instructions. No query
/// parameters are sent, whatever `use_params` says.
pub async fn xml_user_pass_not_paged<F: Fetch, S: PageSink>(
    ctx: &mut ExtractionContext<'_, F, S>,
) -> StrategyResult {
    let request = PageRequest {
        params: QueryParams::new(),
        ..PageRequest::for_endpoint(ctx.descriptor)
    };
    let fetched = ctx.get(&request).await?;
    let body = normalize_xml(&fetched.bytes)?;
    ctx.write(None, PageFormat::Xml, body).await
}

/// Fallback shape: body stored verbatim, no check that it really is CSV.
pub async fn csv_not_paged<F: Fetch, S: PageSink>(
    ctx: &mut ExtractionContext<'_, F, S>,
) -> StrategyResult {
    let request = PageRequest::for_endpoint(ctx.descriptor);
    let fetched = ctx.get(&request).await?;
    ctx.write(None, PageFormat::Csv, fetched.bytes).await
}

pub(crate) fn normalize_xml(bytes: &[u8]) -> Result<Vec<u8>, ExtractionError> {
    let mut reader = Reader::from_reader(bytes);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut roots = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            ExtractionError::MalformedResponse(format!(
                "invalid XML at byte {}: {}",
                reader.error_position(),
                e
            ))
        })?;

        match event {
            Event::Eof => break,
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Text(_) if depth == 0 => {}
            event => {
                match &event {
                    Event::Start(_) => {
                        if depth == 0 {
                            roots += 1;
                        }
                        depth += 1;
                    }
                    Event::End(_) => depth = depth.saturating_sub(1),
                    Event::Empty(_) if depth == 0 => roots += 1,
                    _ => {}
                }
                writer
                    .write_event(event)
                    .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;
            }
        }
        buf.clear();
    }

    if roots != 1 || depth != 0 {
        return Err(ExtractionError::MalformedResponse(format!(
            "expected a single XML root element, found {}",
            roots
        )));
    }
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::MemoryBlobStore;
    use crate::domain::model::{ApiType, AuthType};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// 依序回傳預先排好的回應
    #[derive(Default)]
    struct ScriptedFetcher {
        token: Option<Result<String, ExtractionError>>,
        responses: Mutex<VecDeque<Result<FetchedBody, ExtractionError>>>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl ScriptedFetcher {
        fn new() -> Self {
            Self::default()
        }

        fn with_token(mut self, token: &str) -> Self {
            self.token = Some(Ok(token.to_string()));
            self
        }

        fn then_json(self, value: Value) -> Self {
            self.then_bytes(value.to_string().into_bytes())
        }

        fn then_bytes(self, bytes: Vec<u8>) -> Self {
            self.responses.lock().unwrap().push_back(Ok(FetchedBody {
                status: 200,
                url: "http://api.test".to_string(),
                bytes,
            }));
            self
        }

        fn then_fail(self, error: ExtractionError) -> Self {
            self.responses.lock().unwrap().push_back(Err(error));
            self
        }

        fn requests(&self) -> Vec<PageRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Fetch for ScriptedFetcher {
        async fn fetch_token(
            &self,
            _descriptor: &EndpointDescriptor,
            _credentials: &Credentials,
        ) -> Result<String, ExtractionError> {
            self.token
                .clone()
                .unwrap_or_else(|| Err(ExtractionError::Request("no token scripted".into())))
        }

        async fn get(
            &self,
            _descriptor: &EndpointDescriptor,
            _credentials: &Credentials,
            request: &PageRequest,
        ) -> Result<FetchedBody, ExtractionError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ExtractionError::Request("script exhausted".into())))
        }
    }

    fn descriptor(api_type: ApiType, auth_type: AuthType) -> EndpointDescriptor {
        EndpointDescriptor {
            endpoint_name: "myendpoint".to_string(),
            base_url: "http://api.test".to_string(),
            endpoint_url: "/v1/items".to_string(),
            api_type,
            declared_api_type: api_type.as_str().to_string(),
            auth_type,
            use_params: true,
            additional_url_params: QueryParams::new(),
            token_url: Some("http://api.test/token".to_string()),
            user: "user".to_string(),
            first_page_number: 1,
            total_pages_key_name: Some("total".to_string()),
            destination_path: "raw/source/myendpoint".to_string(),
        }
    }

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn test_user_pass_paged_count_writes_first_then_loops_to_total_exclusive() {
        let fetcher = ScriptedFetcher::new()
            .then_json(json!({"total": 3, "items": ["a"]}))
            .then_json(json!({"total": 3, "items": ["a"]}))
            .then_json(json!({"total": 3, "items": ["b"]}));
        let sink = MemoryBlobStore::new();
        let d = descriptor(ApiType::JsonUserPassPagedCount, AuthType::UserPass);
        let creds = Credentials::default();
        let mut ctx = ExtractionContext::new(&fetcher, &sink, &d, &creds, run_date());

        json_user_pass_paged_count(&mut ctx).await.unwrap();

        assert_eq!(
            sink.file_names("raw/source/myendpoint"),
            vec![
                "myendpoint-20240101-page-001.json",
                "myendpoint-20240101-page-002.json"
            ]
        );
        assert_eq!(ctx.report.last_page, Some(2));
        // 第一頁被抓了兩次，最後寫入的是迴圈那一次
        assert_eq!(ctx.report.pages_written, 3);
        let pages: Vec<Option<String>> = fetcher
            .requests()
            .iter()
            .map(|r| r.params.get("page").map(str::to_string))
            .collect();
        assert_eq!(
            pages,
            vec![Some("1".into()), Some("1".into()), Some("2".into())]
        );
    }

    #[tokio::test]
    async fn test_user_pass_paged_count_missing_total_key() {
        let fetcher = ScriptedFetcher::new().then_json(json!({"items": []}));
        let sink = MemoryBlobStore::new();
        let d = descriptor(ApiType::JsonUserPassPagedCount, AuthType::UserPass);
        let creds = Credentials::default();
        let mut ctx = ExtractionContext::new(&fetcher, &sink, &d, &creds, run_date());

        let err = json_user_pass_paged_count(&mut ctx).await.unwrap_err();

        assert_eq!(err.kind(), "MalformedResponse");
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_token_paged_count_uses_nested_total_and_skips_discovery_page() {
        let fetcher = ScriptedFetcher::new()
            .with_token("tok")
            .then_json(json!({"meta": {"paging": {"total": 4}}}))
            .then_json(json!({"page": 2}))
            .then_json(json!({"page": 3}));
        let sink = MemoryBlobStore::new();
        let mut d = descriptor(ApiType::JsonTokenPagedCount, AuthType::Token);
        d.first_page_number = 2;
        let creds = Credentials::default();
        let mut ctx = ExtractionContext::new(&fetcher, &sink, &d, &creds, run_date());

        json_token_paged_count(&mut ctx).await.unwrap();

        assert_eq!(
            sink.file_names("raw/source/myendpoint"),
            vec![
                "myendpoint-20240101-page-002.json",
                "myendpoint-20240101-page-003.json"
            ]
        );
        let requests = fetcher.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.bearer.as_deref() == Some("tok")));
        assert_eq!(requests[0].params.get("page"), None);
        assert_eq!(
            sink.body("raw/source/myendpoint", "myendpoint-20240101-page-003.json"),
            Some(br#"{"page": 3}"#.to_vec())
        );
    }

    #[tokio::test]
    async fn test_token_failure_stops_before_any_get() {
        let fetcher = ScriptedFetcher {
            token: Some(Err(ExtractionError::Http {
                status: 401,
                url: "http://api.test/token".into(),
            })),
            ..Default::default()
        };
        let sink = MemoryBlobStore::new();
        let d = descriptor(ApiType::JsonTokenPagedCount, AuthType::Token);
        let creds = Credentials::default();
        let mut ctx = ExtractionContext::new(&fetcher, &sink, &d, &creds, run_date());

        let err = json_token_paged_count(&mut ctx).await.unwrap_err();

        assert_eq!(err.kind(), "HTTPError");
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_next_link_numbers_pages_sequentially() {
        let fetcher = ScriptedFetcher::new()
            .then_json(json!({"d": {"results": [1], "__next": "http://api.test/v1/items?$skiptoken=50"}}))
            .then_json(json!({"d": {"results": [2], "__next": "http://api.test/v1/items?$skiptoken=100"}}))
            .then_json(json!({"d": {"results": [3]}}));
        let sink = MemoryBlobStore::new();
        let d = descriptor(ApiType::JsonUserPassPagedNext, AuthType::UserPass);
        let creds = Credentials::default();
        let mut ctx = ExtractionContext::new(&fetcher, &sink, &d, &creds, run_date());

        json_user_pass_paged_next(&mut ctx).await.unwrap();

        assert_eq!(
            sink.file_names("raw/source/myendpoint"),
            vec![
                "myendpoint-20240101-page-001.json",
                "myendpoint-20240101-page-002.json",
                "myendpoint-20240101-page-003.json"
            ]
        );
        let urls: Vec<String> = fetcher.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "http://api.test/v1/items",
                "http://api.test/v1/items?$skiptoken=50",
                "http://api.test/v1/items?$skiptoken=100"
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_mid_pagination_keeps_earlier_pages() {
        let fetcher = ScriptedFetcher::new()
            .then_json(json!({"total": 4}))
            .then_json(json!({"total": 4}))
            .then_fail(ExtractionError::Connection("http://api.test/v1/items".into()));
        let sink = MemoryBlobStore::new();
        let d = descriptor(ApiType::JsonUserPassPagedCount, AuthType::UserPass);
        let creds = Credentials::default();
        let mut ctx = ExtractionContext::new(&fetcher, &sink, &d, &creds, run_date());

        let err = json_user_pass_paged_count(&mut ctx).await.unwrap_err();

        assert_eq!(err.kind(), "ConnectionError");
        assert_eq!(
            sink.file_names("raw/source/myendpoint"),
            vec!["myendpoint-20240101-page-001.json"]
        );
        assert_eq!(ctx.report.last_page, Some(1));
    }

    #[tokio::test]
    async fn test_api_key_injects_registrationkey() {
        let fetcher = ScriptedFetcher::new().then_json(json!({"Results": {}}));
        let sink = MemoryBlobStore::new();
        let d = descriptor(ApiType::JsonApiKeyNotPaged, AuthType::ApiKey);
        let creds = Credentials::new(Some("key-123".to_string()), None);
        let mut ctx = ExtractionContext::new(&fetcher, &sink, &d, &creds, run_date());

        json_api_key_not_paged(&mut ctx).await.unwrap();

        assert_eq!(
            fetcher.requests()[0].params.get("registrationkey"),
            Some("key-123")
        );
        // descriptor 本身不會被改動
        assert!(d.additional_url_params.is_empty());
        assert_eq!(
            sink.file_names("raw/source/myendpoint"),
            vec!["myendpoint-20240101.json"]
        );
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed_and_not_written() {
        let fetcher = ScriptedFetcher::new().then_bytes(b"<html>oops</html>".to_vec());
        let sink = MemoryBlobStore::new();
        let d = descriptor(ApiType::JsonUserPassNotPaged, AuthType::UserPass);
        let creds = Credentials::default();
        let mut ctx = ExtractionContext::new(&fetcher, &sink, &d, &creds, run_date());

        let err = json_user_pass_not_paged(&mut ctx).await.unwrap_err();

        assert_eq!(err.kind(), "MalformedResponse");
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_xml_written_without_declaration() {
        let fetcher = ScriptedFetcher::new().then_bytes(
            br#"<?xml version="1.0" encoding="UTF-8"?>
<!-- generated -->
<series id="CUUR0000SA0"><obs year="2024">308.4</obs></series>
"#
            .to_vec(),
        );
        let sink = MemoryBlobStore::new();
        let d = descriptor(ApiType::XmlUserPassNotPaged, AuthType::UserPass);
        let creds = Credentials::default();
        let mut ctx = ExtractionContext::new(&fetcher, &sink, &d, &creds, run_date());

        xml_user_pass_not_paged(&mut ctx).await.unwrap();

        assert_eq!(
            sink.body("raw/source/myendpoint", "myendpoint-20240101.xml"),
            Some(br#"<series id="CUUR0000SA0"><obs year="2024">308.4</obs></series>"#.to_vec())
        );
    }

    #[tokio::test]
    async fn test_xml_request_carries_no_params() {
        let fetcher = ScriptedFetcher::new().then_bytes(b"<a/>".to_vec());
        let sink = MemoryBlobStore::new();
        let mut d = descriptor(ApiType::XmlUserPassNotPaged, AuthType::UserPass);
        d.additional_url_params = QueryParams::new().with("format", "json");
        let creds = Credentials::default();
        let mut ctx = ExtractionContext::new(&fetcher, &sink, &d, &creds, run_date());

        xml_user_pass_not_paged(&mut ctx).await.unwrap();

        let requests = fetcher.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].params.is_empty());
    }

    #[test]
    fn test_normalize_xml_rejects_malformed_documents() {
        assert!(normalize_xml(b"<a><b></a>").is_err());
        assert!(normalize_xml(b"just text").is_err());
        assert!(normalize_xml(b"<a/><b/>").is_err());
        assert!(normalize_xml(b"<a/>").is_ok());
    }

    #[tokio::test]
    async fn test_csv_fallback_stores_body_verbatim() {
        let fetcher = ScriptedFetcher::new().then_bytes(b"id,value\n1,2\n".to_vec());
        let sink = MemoryBlobStore::new();
        let d = descriptor(ApiType::CsvNotPaged, AuthType::UserPass);
        let creds = Credentials::default();
        let mut ctx = ExtractionContext::new(&fetcher, &sink, &d, &creds, run_date());

        csv_not_paged(&mut ctx).await.unwrap();

        let page = sink.page("raw/source/myendpoint", "myendpoint-20240101.csv").unwrap();
        assert_eq!(page.content_type, "text/csv");
        assert_eq!(page.body, b"id,value\n1,2\n");
    }
}
