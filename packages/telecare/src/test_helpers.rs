use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::body::Bytes;
use axum::extract::{Multipart, OriginalUri, Path, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::{Sink, SinkExt, StreamExt};
use serde_json::{Value, json};
use telecare_auth::{Claims, Role, mint_unsigned};
use tokio::sync::{broadcast, oneshot};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::config::{ApiConfig, LiveConfig};
use crate::error::ChannelError;
use crate::live::{ChannelHandle, ClientEvent, Connect, EventName, Handlers, LiveEvent, Room};

/// Poll `cond` until it holds, failing the test after five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// -- in-memory transport ---------------------------------------------------

#[derive(Default)]
struct MemoryTransport {
    joins: Vec<ClientEvent>,
    sent: Vec<ClientEvent>,
    teardowns: usize,
    inbound: Option<futures::channel::mpsc::UnboundedSender<Result<Message, tungstenite::Error>>>,
}

/// Connector over an in-process channel pair. Records every join, outbound
/// event, and close frame; `push` feeds the most recently opened channel.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    transport: Arc<Mutex<MemoryTransport>>,
    refuse: bool,
}

impl MemoryConnector {
    /// A connector whose every `open` fails as if the server were down.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    pub fn joins(&self) -> Vec<ClientEvent> {
        self.transport.lock().unwrap().joins.clone()
    }

    pub fn sent(&self) -> Vec<ClientEvent> {
        self.transport.lock().unwrap().sent.clone()
    }

    pub fn teardowns(&self) -> usize {
        self.transport.lock().unwrap().teardowns
    }

    pub fn push(&self, event: &LiveEvent) {
        self.push_raw(&event.encode());
    }

    pub fn push_raw(&self, text: &str) {
        if let Some(tx) = &self.transport.lock().unwrap().inbound {
            let _ = tx.unbounded_send(Ok(Message::Text(text.to_string().into())));
        }
    }

    /// Simulate the server dropping the connection.
    pub fn hang_up(&self) {
        self.transport.lock().unwrap().inbound = None;
    }
}

impl Connect for MemoryConnector {
    async fn open(&self, room: Room, handlers: Handlers) -> Result<ChannelHandle, ChannelError> {
        if self.refuse {
            return Err(ChannelError::Unavailable);
        }
        let (tx, rx) = futures::channel::mpsc::unbounded();
        self.transport.lock().unwrap().inbound = Some(tx);
        crate::live::start(room, handlers, RecordingSink(self.transport.clone()), rx).await
    }
}

struct RecordingSink(Arc<Mutex<MemoryTransport>>);

impl Sink<Message> for RecordingSink {
    type Error = Infallible;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Infallible> {
        let mut transport = self.0.lock().unwrap();
        match item {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(join @ (ClientEvent::JoinUser(_) | ClientEvent::JoinConversation(_))) => {
                    transport.joins.push(join)
                }
                Ok(event) => transport.sent.push(event),
                Err(_) => {}
            },
            Message::Close(_) => transport.teardowns += 1,
            _ => {}
        }
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }
}

// -- fake backend ----------------------------------------------------------

/// Far enough out that fixtures never expire.
const FIXTURE_EXP: i64 = 4_102_444_800;

/// What the fake backend has seen, plus knobs tests can turn.
#[derive(Debug, Clone, Default)]
pub struct FakeState {
    pub bare_activities: bool,
    pub incomplete_profile: bool,
    pub last_search_query: Option<String>,
    pub search_calls: usize,
    pub profile_calls: usize,
    pub stats_calls: usize,
    pub joins: Vec<ClientEvent>,
    pub sent: Vec<ClientEvent>,
    pub ws_auth: Option<String>,
    pub ws_closes: usize,
    /// JSON resource calls, in arrival order.
    pub requests: Vec<RecordedRequest>,
    /// Multipart medical-record uploads, in arrival order.
    pub uploads: Vec<RecordedUpload>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: String,
    /// Path below `/api`.
    pub path: String,
    /// `Null` when the request had no body.
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpload {
    pub method: String,
    pub path: String,
    pub fields: Vec<FormField>,
}

impl RecordedUpload {
    /// Text of the first field called `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.data.as_str())
    }
}

#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<FakeState>>,
    push: broadcast::Sender<String>,
    token: String,
}

impl Shared {
    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            None => Err(error(StatusCode::UNAUTHORIZED, "No token provided")),
            Some(value) if value == format!("Bearer {}", self.token) => Ok(()),
            Some(_) => Err(error(StatusCode::UNAUTHORIZED, "Invalid token")),
        }
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// REST and WebSocket backend on an ephemeral port, serving `/api/*` and
/// `/ws`. Shuts down when dropped.
pub struct FakeBackend {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<FakeState>>,
    push: broadcast::Sender<String>,
    token: String,
    _shutdown: oneshot::Sender<()>,
}

impl FakeBackend {
    pub async fn spawn() -> Self {
        let token = mint_unsigned(&Claims {
            user_id: "u1".into(),
            email: "ada@example.com".into(),
            role: Role::Patient,
            exp: FIXTURE_EXP,
        });
        let (push, _) = broadcast::channel(64);
        let shared = Shared {
            state: Arc::new(Mutex::new(FakeState::default())),
            push: push.clone(),
            token: token.clone(),
        };

        let api = Router::new()
            .route("/echo-auth", get(echo_auth))
            .route("/auth/login", post(login))
            .route("/auth/register", post(register))
            .route("/user/profile", get(profile))
            .route("/stats", get(stats))
            .route("/stats/weekly", get(weekly))
            .route("/activities", get(activities))
            .route("/activities/recent", get(recent_appointments))
            .route("/appointments", get(appointments).post(resource))
            .route(
                "/appointments/{id}",
                get(resource).put(resource).delete(resource),
            )
            .route("/doctors", get(resource).post(resource))
            .route("/doctors/{id}", get(resource).put(resource))
            .route("/admin/users", get(resource))
            .route("/admin/medical-records", get(resource))
            .route(
                "/admin/medical-records/{id}",
                get(resource).put(record_upload).delete(resource),
            )
            .route("/medical-records", post(record_upload))
            .route("/admin/health-metrics", get(resource))
            .route(
                "/admin/health-metrics/{id}",
                put(resource).delete(resource),
            )
            .route("/conversations", get(conversations))
            .route("/conversations/{id}/messages", get(messages))
            .route("/ai/history", get(ai_history))
            .route("/ai/analyze", post(ai_analyze))
            .route("/search", get(search));
        let app = Router::new()
            .nest("/api", api)
            .route("/ws", get(live))
            .with_state(shared.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state: shared.state,
            push,
            token,
            _shutdown: tx,
        }
    }

    /// Token the backend accepts, owned by user `u1`.
    pub fn valid_token(&self) -> String {
        self.token.clone()
    }

    /// Broadcast `event` to every connected socket.
    pub fn push(&self, event: &LiveEvent) {
        let _ = self.push.send(event.encode());
    }
}

pub fn api_config(backend: &FakeBackend) -> ApiConfig {
    ApiConfig {
        base_url: format!("http://{}/api", backend.addr),
        timeout: Some(Duration::from_secs(5)),
    }
}

pub fn live_config(backend: &FakeBackend) -> LiveConfig {
    LiveConfig {
        url: format!("ws://{}/ws", backend.addr),
        activity_feed_cap: 5,
    }
}

fn user_json(completed: bool) -> Value {
    json!({
        "id": "u1",
        "email": "ada@example.com",
        "role": "patient",
        "profile": {
            "firstName": "Ada",
            "lastName": "Lovelace",
            "hasCompletedProfile": completed,
            "hasAcceptedTerms": true
        }
    })
}

fn doctor_json() -> Value {
    json!({
        "_id": "d1",
        "email": "grace@example.com",
        "role": "doctor",
        "profile": { "firstName": "Grace", "lastName": "Hopper" }
    })
}

fn message_json(id: &str, conversation: &str, content: &str) -> Value {
    json!({
        "_id": id,
        "sender": doctor_json(),
        "content": content,
        "createdAt": "2024-05-01T10:00:00Z",
        "conversation": conversation
    })
}

async fn echo_auth(headers: HeaderMap) -> Response {
    match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(value) => Json(json!({ "authorization": value })).into_response(),
        None => error(StatusCode::UNAUTHORIZED, "No token provided"),
    }
}

async fn login(State(shared): State<Shared>, Json(body): Json<Value>) -> Response {
    if body["email"] == "ada@example.com" && body["password"] == "hunter2" {
        Json(json!({ "token": shared.token })).into_response()
    } else {
        error(StatusCode::UNAUTHORIZED, "Invalid email or password")
    }
}

async fn register(State(shared): State<Shared>, Json(body): Json<Value>) -> Response {
    if body["email"] == "taken@example.com" {
        return error(StatusCode::BAD_REQUEST, "User already exists");
    }
    shared.state.lock().unwrap().incomplete_profile = true;
    Json(json!({ "token": shared.token })).into_response()
}

async fn profile(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(resp) = shared.authorize(&headers) {
        return resp;
    }
    let mut state = shared.state.lock().unwrap();
    state.profile_calls += 1;
    Json(user_json(!state.incomplete_profile)).into_response()
}

async fn stats(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(resp) = shared.authorize(&headers) {
        return resp;
    }
    shared.state.lock().unwrap().stats_calls += 1;
    Json(json!({
        "upcomingAppointments": 2,
        "aiAnalyses": 1,
        "newMessages": 3,
        "prescriptionsReady": 0
    }))
    .into_response()
}

async fn weekly(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(resp) = shared.authorize(&headers) {
        return resp;
    }
    Json(json!([{ "day": "Mon", "appointments": 1, "messages": 2 }])).into_response()
}

async fn activities(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(resp) = shared.authorize(&headers) {
        return resp;
    }
    let items = json!([
        { "_id": "a2", "type": "message", "description": "New message", "timestamp": "2024-05-01T10:05:00Z" },
        { "_id": "a1", "type": "appointment", "description": "Appointment booked", "timestamp": "2024-05-01T10:00:00Z" }
    ]);
    if shared.state.lock().unwrap().bare_activities {
        Json(items).into_response()
    } else {
        Json(json!({ "data": items })).into_response()
    }
}

async fn recent_appointments(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(resp) = shared.authorize(&headers) {
        return resp;
    }
    Json(json!([])).into_response()
}

async fn appointments(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(resp) = shared.authorize(&headers) {
        return resp;
    }
    Json(json!([{
        "_id": "ap1",
        "patient": user_json(true),
        "doctor": doctor_json(),
        "dateTime": "2024-06-01T09:00:00Z",
        "status": "scheduled"
    }]))
    .into_response()
}

async fn conversations(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(resp) = shared.authorize(&headers) {
        return resp;
    }
    Json(json!([{
        "_id": "c1",
        "participants": [user_json(true), doctor_json()],
        "lastActivity": "2024-05-01T10:00:00Z"
    }]))
    .into_response()
}

async fn messages(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = shared.authorize(&headers) {
        return resp;
    }
    Json(json!([message_json("m1", &id, "How are you feeling?")])).into_response()
}

async fn ai_history(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(resp) = shared.authorize(&headers) {
        return resp;
    }
    Json(json!([])).into_response()
}

async fn ai_analyze(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = shared.authorize(&headers) {
        return resp;
    }
    if body["type"] != "symptom" || !body["inputData"]["symptoms"].is_array() {
        return error(StatusCode::BAD_REQUEST, "Symptoms are required");
    }
    Json(json!({
        "_id": "an1",
        "type": "symptom",
        "analysis": {
            "riskLevel": "low",
            "recommendations": ["Rest", "Hydrate"],
            "suggestedSpecialty": "General Practice",
            "urgency": "low"
        },
        "createdAt": "2024-05-01T10:00:00Z"
    }))
    .into_response()
}

async fn search(
    State(shared): State<Shared>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    {
        let mut state = shared.state.lock().unwrap();
        state.search_calls += 1;
        state.last_search_query = query;
    }
    if let Err(resp) = shared.authorize(&headers) {
        return resp;
    }
    Json(json!({
        "data": {
            "doctors": {
                "data": [doctor_json()],
                "pagination": { "page": 1, "limit": 10, "total": 1, "pages": 1 }
            },
            "appointments": { "data": [] }
        }
    }))
    .into_response()
}

fn api_path(uri: &axum::http::Uri) -> String {
    uri.path().trim_start_matches("/api").to_string()
}

fn record_json(id: &str, title: &str) -> Value {
    json!({
        "_id": id,
        "patient": { "_id": "u1" },
        "type": "test",
        "title": title,
        "files": [{
            "filename": "f1.pdf",
            "originalName": "bloods.pdf",
            "mimetype": "application/pdf",
            "size": 1024,
            "url": "/uploads/f1.pdf"
        }],
        "tags": ["bloods"],
        "createdAt": "2024-05-01T10:00:00Z"
    })
}

fn appointment_json(id: &str, status: &str) -> Value {
    json!({
        "_id": id,
        "patient": user_json(true),
        "doctor": doctor_json(),
        "dateTime": "2024-06-01T09:00:00Z",
        "status": status
    })
}

/// Appointments, doctors, and the admin screens. Records every call and
/// answers with a fixture shaped like the real backend's.
async fn resource(
    State(shared): State<Shared>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = shared.authorize(&headers) {
        return resp;
    }
    let path = api_path(&uri);
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    shared.state.lock().unwrap().requests.push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        body: body.clone(),
    });

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let status_of = |body: &Value| body["status"].as_str().unwrap_or("scheduled").to_string();
    let reply = match (method.as_str(), segments.as_slice()) {
        (_, ["appointments", "missing"]) => {
            return error(StatusCode::NOT_FOUND, "Appointment not found");
        }
        ("GET", ["appointments", id]) => appointment_json(id, "confirmed"),
        ("POST", ["appointments"]) => appointment_json("ap2", &status_of(&body)),
        ("PUT", ["appointments", id]) => appointment_json(id, &status_of(&body)),
        ("GET", ["doctors"]) => json!([doctor_json()]),
        ("GET", ["doctors", _]) => doctor_json(),
        ("POST", ["doctors"]) if body["email"] == "grace@example.com" => {
            return error(StatusCode::BAD_REQUEST, "Doctor already exists");
        }
        ("POST", ["doctors"]) | ("PUT", ["doctors", _]) => {
            let mut doctor = doctor_json();
            doctor["profile"] = body["profile"].clone();
            doctor["doctorProfile"] = body["doctorProfile"].clone();
            doctor
        }
        ("GET", ["admin", "users"]) => json!([user_json(true), doctor_json()]),
        ("GET", ["admin", "medical-records"]) => json!([record_json("r1", "Blood panel")]),
        ("GET", ["admin", "medical-records", id]) => record_json(id, "Blood panel"),
        ("GET", ["admin", "health-metrics"]) => {
            let mut user = user_json(true);
            user["healthMetrics"] = json!({ "heartRate": 64, "bloodPressure": "120/80" });
            json!([user])
        }
        ("PUT", ["admin", "health-metrics", _]) => {
            let mut metrics = body.clone();
            metrics["_id"] = json!("hm1");
            metrics
        }
        ("DELETE", _) => json!({ "message": "Deleted" }),
        _ => return error(StatusCode::NOT_FOUND, "Not found"),
    };
    Json(reply).into_response()
}

/// Multipart create (`POST /medical-records`) and edit
/// (`PUT /admin/medical-records/{id}`).
async fn record_upload(
    State(shared): State<Shared>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if let Err(resp) = shared.authorize(&headers) {
        return resp;
    }
    let mut fields = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(str::to_owned);
        let data = field.bytes().await.unwrap();
        fields.push(FormField {
            name,
            file_name,
            content_type,
            data: String::from_utf8_lossy(&data).into_owned(),
        });
    }
    let upload = RecordedUpload {
        method: method.to_string(),
        path: api_path(&uri),
        fields,
    };
    shared.state.lock().unwrap().uploads.push(upload.clone());

    if upload.field("patient") == Some("missing") {
        return error(StatusCode::NOT_FOUND, "Patient not found");
    }
    let title = upload.field("title").unwrap_or_default();
    if title == "Rejected" {
        // The backend reports some validation failures with a 200.
        return Json(json!({ "error": "Record rejected" })).into_response();
    }
    let id = upload.path.rsplit('/').next().filter(|_| method == Method::PUT).unwrap_or("r2");
    Json(record_json(id, title)).into_response()
}

async fn live(
    State(shared): State<Shared>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    shared.state.lock().unwrap().ws_auth = auth;
    ws.on_upgrade(move |socket| live_socket(socket, shared))
}

async fn live_socket(socket: WebSocket, shared: Shared) {
    let mut pushes = shared.push.subscribe();
    let (mut tx, mut rx) = socket.split();

    loop {
        tokio::select! {
            pushed = pushes.recv() => {
                let Ok(text) = pushed else { break };
                if tx.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            frame = rx.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let Ok(event) = serde_json::from_str::<ClientEvent>(text.as_str()) else {
                            continue;
                        };
                        let mut state = shared.state.lock().unwrap();
                        if let ClientEvent::SendMessage(msg) = &event {
                            // Echo back the way the real server fans out to the room.
                            let echo = LiveEvent::new(
                                EventName::NewMessage,
                                message_json(
                                    &format!("m{}", state.sent.len() + 2),
                                    &msg.conversation_id,
                                    &msg.content,
                                ),
                            );
                            let _ = shared.push.send(echo.encode());
                            state.sent.push(event);
                        } else {
                            state.joins.push(event);
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        shared.state.lock().unwrap().ws_closes += 1;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
        }
    }
}
