//! REST implementation of [`ExamBackend`].

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use ktiger_core::model::{
    Attempt, AttemptId, ExamId, ExamResult, ExamSummary, Question, SaveAnswerRequest, SavedAnswer,
    Section, SectionId, UserId,
};
use ktiger_core::traits::ExamBackend;
use ktiger_core::BackendError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const REFRESH_PATH: &str = "/auth/refresh-token";

/// Exam backend client over HTTP/JSON.
///
/// Requests carry `Authorization: Bearer <token>` when an access token is
/// set. A 401 triggers one token refresh and one retry of the request when
/// a refresh token is available.
pub struct HttpExamBackend {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
    access_token: RwLock<Option<String>>,
    refresh_token: Option<String>,
}

impl HttpExamBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs: timeout.as_secs().max(1),
            access_token: RwLock::new(None),
            refresh_token: None,
        })
    }

    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        *self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(token.into());
        self
    }

    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The access token currently in use (it changes after a refresh).
    pub fn access_token(&self) -> Option<String> {
        self.access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.timeout_secs)
        } else {
            BackendError::Network(e.to_string())
        }
    }

    async fn send_once<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, BackendError> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(token) = self.access_token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await.map_err(|e| self.transport_error(e))
    }

    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, BackendError> {
        let response = self.send_once(method.clone(), path, body).await?;
        if response.status() == StatusCode::UNAUTHORIZED && self.refresh_token.is_some() {
            debug!(path, "access token rejected, refreshing");
            self.refresh().await?;
            let retried = self.send_once(method, path, body).await?;
            return check_status(retried, path).await;
        }
        check_status(response, path).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let response = self.execute::<()>(Method::GET, path, None).await?;
        decode(response).await
    }

    async fn refresh(&self) -> Result<(), BackendError> {
        let Some(refresh_token) = self.refresh_token.as_deref() else {
            return Err(BackendError::Unauthorized("no refresh token".into()));
        };
        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "token refresh rejected");
            return Err(BackendError::Unauthorized(format!(
                "token refresh failed (HTTP {})",
                status.as_u16()
            )));
        }
        let refreshed: RefreshResponse = decode(response).await?;
        *self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(refreshed.access_token);
        info!("access token refreshed");
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartExamRequest {
    exam_id: ExamId,
    user_id: UserId,
}

async fn check_status(response: Response, path: &str) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => BackendError::NotFound(path.to_string()),
        StatusCode::UNAUTHORIZED => BackendError::Unauthorized(body),
        _ => BackendError::Api {
            status: status.as_u16(),
            message: body,
        },
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    response
        .json()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))
}

#[async_trait]
impl ExamBackend for HttpExamBackend {
    #[instrument(skip_all, fields(%attempt_id))]
    async fn get_attempt(&self, attempt_id: AttemptId) -> Result<Attempt, BackendError> {
        self.get_json(&format!("/exam-attempts/{attempt_id}")).await
    }

    #[instrument(skip_all, fields(%exam_id))]
    async fn get_sections(&self, exam_id: ExamId) -> Result<Vec<Section>, BackendError> {
        self.get_json(&format!("/exam-sections/exam/{exam_id}")).await
    }

    #[instrument(skip_all, fields(%section_id))]
    async fn get_questions(&self, section_id: SectionId) -> Result<Vec<Question>, BackendError> {
        self.get_json(&format!("/questions/section/{section_id}")).await
    }

    #[instrument(skip_all, fields(%attempt_id))]
    async fn get_answers(&self, attempt_id: AttemptId) -> Result<Vec<SavedAnswer>, BackendError> {
        self.get_json(&format!("/user-answers/attempt/{attempt_id}"))
            .await
    }

    #[instrument(skip_all, fields(attempt_id = %request.attempt_id, question_id = %request.question_id))]
    async fn save_answer(&self, request: &SaveAnswerRequest) -> Result<(), BackendError> {
        self.execute(Method::POST, "/user-answers", Some(request))
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(%attempt_id))]
    async fn submit(&self, attempt_id: AttemptId) -> Result<(), BackendError> {
        self.execute::<()>(
            Method::POST,
            &format!("/exam-attempts/{attempt_id}/submit"),
            None,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(%attempt_id))]
    async fn get_result(&self, attempt_id: AttemptId) -> Result<ExamResult, BackendError> {
        self.get_json(&format!("/exam-attempts/{attempt_id}/result"))
            .await
    }

    #[instrument(skip_all)]
    async fn list_active_exams(&self) -> Result<Vec<ExamSummary>, BackendError> {
        self.get_json("/exams/active").await
    }

    #[instrument(skip_all, fields(%exam_id))]
    async fn get_exam(&self, exam_id: ExamId) -> Result<ExamSummary, BackendError> {
        self.get_json(&format!("/exams/{exam_id}")).await
    }

    #[instrument(skip_all, fields(%exam_id, %user_id))]
    async fn start_exam(&self, exam_id: ExamId, user_id: UserId) -> Result<Attempt, BackendError> {
        let response = self
            .execute(
                Method::POST,
                "/exam-attempts/start",
                Some(&StartExamRequest { exam_id, user_id }),
            )
            .await?;
        decode(response).await
    }

    #[instrument(skip_all, fields(%user_id))]
    async fn attempts_by_user(&self, user_id: UserId) -> Result<Vec<Attempt>, BackendError> {
        self.get_json(&format!("/exam-attempts/user/{user_id}"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ktiger_core::model::{AnswerPayload, AttemptStatus, ChoiceId, QuestionId, SectionType};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> HttpExamBackend {
        HttpExamBackend::new(&server.uri(), DEFAULT_TIMEOUT).unwrap()
    }

    fn attempt_json() -> serde_json::Value {
        serde_json::json!({
            "attemptId": 7,
            "examId": 1,
            "userId": 3,
            "status": "IN_PROGRESS",
            "startedAt": "2026-03-01T09:00:00",
            "examTitle": "TOPIK II 모의고사"
        })
    }

    #[tokio::test]
    async fn fetches_attempt_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exam-attempts/7"))
            .and(header("Authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(attempt_json()))
            .mount(&server)
            .await;

        let backend = backend(&server).with_access_token("tok-1");
        let attempt = backend.get_attempt(AttemptId::new(7)).await.unwrap();
        assert_eq!(attempt.exam_id, ExamId::new(1));
        assert_eq!(attempt.status, AttemptStatus::InProgress);
        assert_eq!(attempt.exam_title.as_deref(), Some("TOPIK II 모의고사"));
    }

    #[tokio::test]
    async fn decodes_sections() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exam-sections/exam/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"sectionId": 11, "sectionOrder": 1, "sectionType": "LISTENING",
                 "durationMinutes": 60, "totalQuestions": 50, "audioUrl": "https://cdn/l.mp3"},
                {"sectionId": 12, "sectionOrder": 2, "sectionType": "READING",
                 "durationMinutes": 70, "totalQuestions": 50}
            ])))
            .mount(&server)
            .await;

        let sections = backend(&server).get_sections(ExamId::new(1)).await.unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].section_type, SectionType::Listening);
        assert_eq!(sections[1].audio_url, None);
    }

    #[tokio::test]
    async fn not_found_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exam-attempts/404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = backend(&server)
            .get_attempt(AttemptId::new(404))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotFound(p) if p == "/exam-attempts/404"));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/exam-attempts/7/submit"))
            .respond_with(ResponseTemplate::new(503).set_body_string("scoring down"))
            .mount(&server)
            .await;

        let err = backend(&server)
            .submit(AttemptId::new(7))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn deselect_is_sent_as_null_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user-answers"))
            .and(body_json(serde_json::json!({
                "attemptId": 7,
                "questionId": 5,
                "choiceId": null
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        backend(&server)
            .save_answer(&SaveAnswerRequest {
                attempt_id: AttemptId::new(7),
                question_id: QuestionId::new(5),
                value: AnswerPayload::Choice { choice_id: None },
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn text_answer_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user-answers"))
            .and(body_json(serde_json::json!({
                "attemptId": 7,
                "questionId": 9,
                "answerText": "저는 학생입니다"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        backend(&server)
            .save_answer(&SaveAnswerRequest {
                attempt_id: AttemptId::new(7),
                question_id: QuestionId::new(9),
                value: AnswerPayload::Text {
                    answer_text: "저는 학생입니다".into(),
                },
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn refreshes_token_once_on_401() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exam-attempts/7"))
            .and(header("Authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .and(body_json(serde_json::json!({"refreshToken": "refresh-1"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"accessToken": "fresh"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/exam-attempts/7"))
            .and(header("Authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(attempt_json()))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(&server)
            .with_access_token("stale")
            .with_refresh_token("refresh-1");
        let attempt = backend.get_attempt(AttemptId::new(7)).await.unwrap();
        assert_eq!(attempt.attempt_id, AttemptId::new(7));
        assert_eq!(backend.access_token().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn failed_refresh_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exams/active"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = backend(&server)
            .with_access_token("stale")
            .with_refresh_token("revoked")
            .list_active_exams()
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn second_401_is_not_retried_again() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exams/active"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"accessToken": "x"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = backend(&server)
            .with_refresh_token("r")
            .list_active_exams()
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn start_exam_posts_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/exam-attempts/start"))
            .and(body_json(serde_json::json!({"examId": 1, "userId": 3})))
            .respond_with(ResponseTemplate::new(200).set_body_json(attempt_json()))
            .mount(&server)
            .await;

        let attempt = backend(&server)
            .start_exam(ExamId::new(1), UserId::new(3))
            .await
            .unwrap();
        assert_eq!(attempt.user_id, Some(UserId::new(3)));
    }

    #[tokio::test]
    async fn saved_answers_decode_both_shapes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user-answers/attempt/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"questionId": 1, "choiceId": 14},
                {"questionId": 2, "answerText": "답"}
            ])))
            .mount(&server)
            .await;

        let answers = backend(&server)
            .get_answers(AttemptId::new(7))
            .await
            .unwrap();
        assert_eq!(answers[0].choice_id, Some(ChoiceId::new(14)));
        assert_eq!(answers[1].answer_text.as_deref(), Some("답"));
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exams/active"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = backend(&server).list_active_exams().await.unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exams/active"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([]))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let backend = HttpExamBackend::new(&server.uri(), Duration::from_millis(200)).unwrap();
        let err = backend.list_active_exams().await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout(_)));
        assert!(err.is_transient());
    }
}
