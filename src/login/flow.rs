//! Login state machine.
//!
//! [`LoginFlow::advance`] is the only entry point: it is called each time the user
//! presses the action button, validates the fields the current stage needs, and
//! performs the matching Telegram call.

use std::{collections::BTreeMap, sync::Arc};

use log::{debug, info, warn};

use crate::{
    login::{Field, LoginForm, LoginSnapshot, LoginState},
    saver::{MediaSaver, SaverSettings},
    telegram::{Account, Connector, Credentials, SessionStore, TelegramApi, TelegramError},
    utils::normalize_phone,
};

/// Stage of the flow, holding the client once connected.
///
/// Keeping the client inside the stages that need it makes it impossible to
/// submit a code or a password before a connection exists.
enum Stage<T> {
    AwaitingCredentials,
    AwaitingCode { client: Arc<T>, phone_number: String },
    AwaitingPassword { client: Arc<T> },
    Authenticated { client: Arc<T>, account: Account },
}

impl<T> Stage<T> {
    fn state(&self) -> LoginState {
        match self {
            Stage::AwaitingCredentials => LoginState::AwaitingCredentials,
            Stage::AwaitingCode { .. } => LoginState::AwaitingCode,
            Stage::AwaitingPassword { .. } => LoginState::AwaitingPassword,
            Stage::Authenticated { .. } => LoginState::Authenticated,
        }
    }

    fn client(&self) -> Option<Arc<T>> {
        match self {
            Stage::AwaitingCredentials => None,
            Stage::AwaitingCode { client, .. }
            | Stage::AwaitingPassword { client }
            | Stage::Authenticated { client, .. } => Some(Arc::clone(client)),
        }
    }
}

/// Login flow controller.
///
/// One instance exists per process. It produces an authenticated client and, on
/// reaching [`LoginState::Authenticated`], registers the [`MediaSaver`] bound to it.
///
/// # Examples
///
/// ```ignore
/// use saveit::login::{LoginFlow, LoginForm, LoginState};
/// use saveit::telegram::{GrammersConnector, SessionStore};
/// # use saveit::saver::SaverSettings;
///
/// # async fn example(settings: SaverSettings) {
/// let mut flow = LoginFlow::new(GrammersConnector, SessionStore::new("."), settings);
/// let form = LoginForm {
///     api_id: "123456".to_string(),
///     api_hash: "a1b2c3d4".to_string(),
///     phone_number: "+98912...".to_string(),
///     ..LoginForm::default()
/// };
///
/// if flow.advance(&form).await == LoginState::AwaitingCode {
///     println!("check your phone");
/// }
/// # }
/// ```
pub struct LoginFlow<C: Connector> {
    /// Builds the client from the credentials
    connector: C,
    /// Picks the session file of the phone number
    sessions: SessionStore,
    /// Settings handed to the media saver
    settings: SaverSettings,
    /// Current stage
    stage: Stage<C::Client>,
    /// Errors of the last advance, per field
    field_errors: BTreeMap<Field, String>,
    /// Error of the last advance not tied to a field
    notice: Option<String>,
    /// Saver registered once authenticated, until taken by the listener
    media_saver: Option<MediaSaver<C::Client>>,
}

impl<C: Connector> LoginFlow<C> {
    /// Creates a flow waiting for credentials.
    pub fn new(connector: C, sessions: SessionStore, settings: SaverSettings) -> Self {
        LoginFlow {
            connector,
            sessions,
            settings,
            stage: Stage::AwaitingCredentials,
            field_errors: BTreeMap::new(),
            notice: None,
            media_saver: None,
        }
    }

    /// Current stage.
    pub fn state(&self) -> LoginState {
        self.stage.state()
    }

    /// The logged in account, once authenticated.
    pub fn account(&self) -> Option<&Account> {
        match &self.stage {
            Stage::Authenticated { account, .. } => Some(account),
            _ => None,
        }
    }

    /// Hands the registered media saver over to the message listener.
    pub fn take_media_saver(&mut self) -> Option<MediaSaver<C::Client>> {
        self.media_saver.take()
    }

    /// Everything the window needs to render the flow.
    pub fn snapshot(&self) -> LoginSnapshot {
        LoginSnapshot {
            state: self.state(),
            field_errors: self.field_errors.clone(),
            notice: self.notice.clone(),
            account: self.account().cloned(),
        }
    }

    /// Runs one step of the flow with the values of `form`.
    ///
    /// Failures never escape: they are recorded as field errors or as the notice
    /// and the stage is left unchanged so the user can retry.
    ///
    /// # Returns
    ///
    /// The stage after the step.
    pub async fn advance(&mut self, form: &LoginForm) -> LoginState {
        self.field_errors.clear();
        self.notice = None;

        let state = self.state();
        if !self.validate(state, form) {
            debug!("missing fields for {:?}", state);
            return state;
        }

        let next = match &self.stage {
            Stage::AwaitingCredentials => self.submit_credentials(form).await,
            Stage::AwaitingCode {
                client,
                phone_number,
            } => {
                let client = Arc::clone(client);
                let phone_number = phone_number.clone();
                self.submit_code(client, &phone_number, &form.code).await
            }
            Stage::AwaitingPassword { client } => {
                let client = Arc::clone(client);
                self.submit_password(client, &form.password).await
            }
            Stage::Authenticated { .. } => None,
        };

        if let Some(stage) = next {
            info!("login flow: {:?} -> {:?}", state, stage.state());
            self.stage = stage;
        }

        self.state()
    }

    /// Closes the client, if one was connected.
    pub async fn disconnect(&mut self) {
        self.media_saver = None;
        if let Some(client) = self.stage.client() {
            client.disconnect().await;
        }
    }

    /// Marks the required fields that are empty or malformed.
    fn validate(&mut self, state: LoginState, form: &LoginForm) -> bool {
        for field in state.required_fields() {
            let value = form.value(*field).trim();
            if value.is_empty() {
                self.field_errors.insert(*field, "Required".to_owned());
            } else if *field == Field::ApiId && value.parse::<i32>().is_err() {
                self.field_errors
                    .insert(*field, "Must be a number".to_owned());
            } else if *field == Field::PhoneNumber && normalize_phone(value).is_empty() {
                // Sessions are keyed by the digits of the number
                self.field_errors
                    .insert(*field, "Must contain digits".to_owned());
            }
        }

        self.field_errors.is_empty()
    }

    async fn submit_credentials(&mut self, form: &LoginForm) -> Option<Stage<C::Client>> {
        let Ok(api_id) = form.api_id.trim().parse::<i32>() else {
            self.field_errors
                .insert(Field::ApiId, "Must be a number".to_owned());
            return None;
        };
        let credentials = Credentials {
            api_id,
            api_hash: form.api_hash.trim().to_owned(),
            phone_number: form.phone_number.trim().to_owned(),
        };

        let session_path = self.sessions.session_path(&credentials.phone_number);
        debug!(
            "use session {} (exists: {})",
            session_path.display(),
            self.sessions.has_session(&credentials.phone_number)
        );

        let result = self.connect(&credentials, &session_path).await;
        match result {
            Ok((client, true)) => self.authenticate(client).await,
            Ok((client, false)) => Some(Stage::AwaitingCode {
                client,
                phone_number: credentials.phone_number,
            }),
            Err(e) => {
                warn!("failed to connect: {}", e);
                self.notice = Some(format!("Error: {}", e));
                None
            }
        }
    }

    /// Connects and, when the session is not authorized yet, requests a login code.
    ///
    /// Returns the client and whether the session was already authorized.
    async fn connect(
        &self,
        credentials: &Credentials,
        session_path: &std::path::Path,
    ) -> Result<(Arc<C::Client>, bool), TelegramError> {
        let client = self.connector.connect(credentials, session_path).await?;

        if client.is_authorized().await? {
            info!("session already authorized");
            return Ok((Arc::new(client), true));
        }

        client.request_login_code(&credentials.phone_number).await?;
        info!("login code sent");
        Ok((Arc::new(client), false))
    }

    async fn submit_code(
        &mut self,
        client: Arc<C::Client>,
        phone_number: &str,
        code: &str,
    ) -> Option<Stage<C::Client>> {
        match client.sign_in(phone_number, code.trim()).await {
            Ok(()) => self.authenticate(client).await,
            Err(TelegramError::PasswordRequired) => Some(Stage::AwaitingPassword { client }),
            Err(e) => {
                warn!("sign in failed: {}", e);
                self.field_errors
                    .insert(Field::Code, "Invalid Code".to_owned());
                None
            }
        }
    }

    async fn submit_password(
        &mut self,
        client: Arc<C::Client>,
        password: &str,
    ) -> Option<Stage<C::Client>> {
        match client.check_password(password).await {
            Ok(()) => self.authenticate(client).await,
            Err(e) => {
                warn!("password check failed: {}", e);
                self.field_errors
                    .insert(Field::Password, "Invalid Password".to_owned());
                None
            }
        }
    }

    /// Fetches the account and registers the media saver.
    async fn authenticate(&mut self, client: Arc<C::Client>) -> Option<Stage<C::Client>> {
        match client.get_me().await {
            Ok(account) => {
                info!("logged in as {} ({})", account.first_name, account.id);
                self.media_saver = Some(MediaSaver::new(
                    Arc::clone(&client),
                    account.id,
                    self.settings.clone(),
                ));
                Some(Stage::Authenticated { client, account })
            }
            Err(e) => {
                warn!("failed to fetch the logged in account: {}", e);
                self.notice = Some(format!("Error: {}", e));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::{MockConnector, MockTelegramApi};
    use mockall::predicate::eq;
    use std::{path::PathBuf, time::Duration};

    const PHONE: &str = "+98 912 000 0000";

    fn create_settings() -> SaverSettings {
        SaverSettings {
            trigger: ".saveit".to_string(),
            download_dir: PathBuf::from("downloads"),
            caption: "Saved via App".to_string(),
            status_delete_delay: Duration::ZERO,
        }
    }

    fn create_form() -> LoginForm {
        LoginForm {
            api_id: "123456".to_string(),
            api_hash: "a1b2c3d4".to_string(),
            phone_number: PHONE.to_string(),
            ..LoginForm::default()
        }
    }

    fn create_account() -> Account {
        Account {
            id: 42,
            first_name: "Sam".to_string(),
        }
    }

    fn create_flow(connector: MockConnector) -> LoginFlow<MockConnector> {
        LoginFlow::new(connector, SessionStore::new("/data"), create_settings())
    }

    /// Connector returning `client` once.
    fn connector_returning(client: MockTelegramApi) -> MockConnector {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .withf(|credentials, session_path| {
                credentials.api_id == 123456
                    && credentials.api_hash == "a1b2c3d4"
                    && session_path.ends_with("session_989120000000.session")
            })
            .times(1)
            .return_once(move |_, _| Ok(client));
        connector
    }

    /// Client with a fresh session that accepts a code request.
    fn fresh_client() -> MockTelegramApi {
        let mut client = MockTelegramApi::new();
        client
            .expect_is_authorized()
            .times(1)
            .returning(|| Ok(false));
        client
            .expect_request_login_code()
            .with(eq(PHONE))
            .times(1)
            .returning(|_| Ok(()));
        client
    }

    #[tokio::test]
    async fn test_empty_credentials_are_marked_invalid() {
        // No expectation: connecting would fail the test
        let mut flow = create_flow(MockConnector::new());

        let form = LoginForm {
            api_id: "123456".to_string(),
            ..LoginForm::default()
        };
        let state = flow.advance(&form).await;

        assert_eq!(state, LoginState::AwaitingCredentials);
        assert_eq!(
            flow.snapshot().field_errors.keys().copied().collect::<Vec<_>>(),
            vec![Field::ApiHash, Field::PhoneNumber]
        );
        assert_eq!(flow.snapshot().field_errors[&Field::ApiHash], "Required");
    }

    #[tokio::test]
    async fn test_each_missing_credential_is_reported_alone() {
        for field in [Field::ApiId, Field::ApiHash, Field::PhoneNumber] {
            let mut flow = create_flow(MockConnector::new());
            let mut form = create_form();
            form.value_mut(field).clear();

            let state = flow.advance(&form).await;

            assert_eq!(state, LoginState::AwaitingCredentials);
            assert_eq!(
                flow.snapshot()
                    .field_errors
                    .keys()
                    .copied()
                    .collect::<Vec<_>>(),
                vec![field]
            );
        }
    }

    #[tokio::test]
    async fn test_blank_credentials_count_as_empty() {
        let mut flow = create_flow(MockConnector::new());
        let mut form = create_form();
        form.api_hash = "   ".to_string();

        flow.advance(&form).await;

        assert!(flow.snapshot().field_errors.contains_key(&Field::ApiHash));
    }

    #[tokio::test]
    async fn test_non_numeric_api_id_is_rejected() {
        let mut flow = create_flow(MockConnector::new());
        let mut form = create_form();
        form.api_id = "12ab".to_string();

        let state = flow.advance(&form).await;

        assert_eq!(state, LoginState::AwaitingCredentials);
        assert_eq!(flow.snapshot().field_errors[&Field::ApiId], "Must be a number");
    }

    #[tokio::test]
    async fn test_phone_without_digits_is_rejected() {
        // Connecting would fail the test
        let mut flow = create_flow(MockConnector::new());
        let mut form = create_form();
        form.phone_number = "+ -".to_string();

        let state = flow.advance(&form).await;

        assert_eq!(state, LoginState::AwaitingCredentials);
        assert_eq!(
            flow.snapshot().field_errors[&Field::PhoneNumber],
            "Must contain digits"
        );
    }

    #[tokio::test]
    async fn test_authorized_session_skips_code() {
        let mut client = MockTelegramApi::new();
        client
            .expect_is_authorized()
            .times(1)
            .returning(|| Ok(true));
        client.expect_request_login_code().never();
        client
            .expect_get_me()
            .times(1)
            .returning(|| Ok(create_account()));
        let mut flow = create_flow(connector_returning(client));

        let state = flow.advance(&create_form()).await;

        assert_eq!(state, LoginState::Authenticated);
        assert_eq!(flow.account(), Some(&create_account()));
        assert_eq!(flow.take_media_saver().map(|s| s.owner_id()), Some(42));
    }

    #[tokio::test]
    async fn test_fresh_session_requests_one_code() {
        let mut flow = create_flow(connector_returning(fresh_client()));

        let state = flow.advance(&create_form()).await;

        assert_eq!(state, LoginState::AwaitingCode);
        assert!(flow.snapshot().field_errors.is_empty());
        assert!(flow.take_media_saver().is_none());
    }

    #[tokio::test]
    async fn test_connection_failure_keeps_credentials_stage() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_, _| Err(TelegramError::other("network unreachable")));
        let mut flow = create_flow(connector);

        let state = flow.advance(&create_form()).await;

        assert_eq!(state, LoginState::AwaitingCredentials);
        assert_eq!(flow.snapshot().notice.as_deref(), Some("Error: network unreachable"));
    }

    #[tokio::test]
    async fn test_code_request_failure_keeps_credentials_stage() {
        let mut client = MockTelegramApi::new();
        client
            .expect_is_authorized()
            .times(1)
            .returning(|| Ok(false));
        client
            .expect_request_login_code()
            .times(1)
            .returning(|_| Err(TelegramError::other("PHONE_NUMBER_INVALID")));
        let mut flow = create_flow(connector_returning(client));

        let state = flow.advance(&create_form()).await;

        assert_eq!(state, LoginState::AwaitingCredentials);
        assert_eq!(flow.snapshot().notice.as_deref(), Some("Error: PHONE_NUMBER_INVALID"));
    }

    #[tokio::test]
    async fn test_empty_code_is_required() {
        let mut flow = create_flow(connector_returning(fresh_client()));
        flow.advance(&create_form()).await;

        let state = flow.advance(&create_form()).await;

        assert_eq!(state, LoginState::AwaitingCode);
        assert_eq!(flow.snapshot().field_errors[&Field::Code], "Required");
    }

    #[tokio::test]
    async fn test_wrong_code_allows_retry() {
        let mut client = fresh_client();
        client
            .expect_sign_in()
            .with(eq(PHONE), eq("00000"))
            .times(1)
            .returning(|_, _| Err(TelegramError::InvalidCode));
        client
            .expect_sign_in()
            .with(eq(PHONE), eq("12345"))
            .times(1)
            .returning(|_, _| Ok(()));
        client
            .expect_get_me()
            .times(1)
            .returning(|| Ok(create_account()));
        let mut flow = create_flow(connector_returning(client));
        flow.advance(&create_form()).await;

        let mut form = create_form();
        form.code = "00000".to_string();
        let state = flow.advance(&form).await;

        assert_eq!(state, LoginState::AwaitingCode);
        assert_eq!(flow.snapshot().field_errors[&Field::Code], "Invalid Code");

        form.code = "12345".to_string();
        let state = flow.advance(&form).await;

        assert_eq!(state, LoginState::Authenticated);
        assert!(flow.snapshot().field_errors.is_empty());
    }

    #[tokio::test]
    async fn test_password_required_moves_to_password_stage() {
        let mut client = fresh_client();
        client
            .expect_sign_in()
            .times(1)
            .returning(|_, _| Err(TelegramError::PasswordRequired));
        let mut flow = create_flow(connector_returning(client));
        flow.advance(&create_form()).await;

        let mut form = create_form();
        form.code = "12345".to_string();
        let state = flow.advance(&form).await;

        assert_eq!(state, LoginState::AwaitingPassword);
        assert!(flow.snapshot().field_errors.is_empty());
    }

    #[tokio::test]
    async fn test_password_stage() {
        let mut client = fresh_client();
        client
            .expect_sign_in()
            .times(1)
            .returning(|_, _| Err(TelegramError::PasswordRequired));
        client
            .expect_check_password()
            .with(eq("wrong"))
            .times(1)
            .returning(|_| Err(TelegramError::InvalidPassword));
        client
            .expect_check_password()
            .with(eq("hunter2"))
            .times(1)
            .returning(|_| Ok(()));
        client
            .expect_get_me()
            .times(1)
            .returning(|| Ok(create_account()));
        let mut flow = create_flow(connector_returning(client));
        let mut form = create_form();
        flow.advance(&form).await;
        form.code = "12345".to_string();
        flow.advance(&form).await;

        form.password = "wrong".to_string();
        let state = flow.advance(&form).await;

        assert_eq!(state, LoginState::AwaitingPassword);
        assert_eq!(flow.snapshot().field_errors[&Field::Password], "Invalid Password");

        form.password = "hunter2".to_string();
        let state = flow.advance(&form).await;

        assert_eq!(state, LoginState::Authenticated);
        let saver = flow.take_media_saver().unwrap();
        assert_eq!(saver.owner_id(), 42);
        assert_eq!(saver.settings().trigger, ".saveit");
        assert!(flow.take_media_saver().is_none());
    }

    #[tokio::test]
    async fn test_get_me_failure_keeps_stage() {
        let mut client = MockTelegramApi::new();
        client
            .expect_is_authorized()
            .times(1)
            .returning(|| Ok(true));
        client
            .expect_get_me()
            .times(1)
            .returning(|| Err(TelegramError::other("AUTH_KEY_UNREGISTERED")));
        let mut flow = create_flow(connector_returning(client));

        let state = flow.advance(&create_form()).await;

        assert_eq!(state, LoginState::AwaitingCredentials);
        assert_eq!(flow.snapshot().notice.as_deref(), Some("Error: AUTH_KEY_UNREGISTERED"));
        assert!(flow.take_media_saver().is_none());
    }

    #[tokio::test]
    async fn test_authenticated_is_terminal() {
        let mut client = MockTelegramApi::new();
        client
            .expect_is_authorized()
            .times(1)
            .returning(|| Ok(true));
        client
            .expect_get_me()
            .times(1)
            .returning(|| Ok(create_account()));
        let mut flow = create_flow(connector_returning(client));
        flow.advance(&create_form()).await;

        // A second press does not connect again
        let state = flow.advance(&create_form()).await;

        assert_eq!(state, LoginState::Authenticated);
        let snapshot = flow.snapshot();
        assert_eq!(snapshot.state, LoginState::Authenticated);
        assert_eq!(snapshot.account, Some(create_account()));
    }

    #[tokio::test]
    async fn test_disconnect_closes_client() {
        let mut client = fresh_client();
        client.expect_disconnect().times(1).returning(|| ());
        let mut flow = create_flow(connector_returning(client));
        flow.advance(&create_form()).await;

        flow.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_without_client() {
        let mut flow = create_flow(MockConnector::new());
        flow.disconnect().await;
        assert_eq!(flow.state(), LoginState::AwaitingCredentials);
    }
}
