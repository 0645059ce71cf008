use super::*;

fn form() -> Registration {
    Registration {
        email: "dewi@example.test".to_owned(),
        password: "hunter22".to_owned(),
        full_name: "Dewi".to_owned(),
        role: Role::User,
    }
}

#[test]
fn login_requires_both_fields() {
    assert!(matches!(validate_login("", "pw"), Err(ChatError::Validation(_))));
    assert!(matches!(validate_login("a@example.test", ""), Err(ChatError::Validation(_))));
    assert!(validate_login("a@example.test", "pw").is_ok());
}

#[test]
fn registration_requires_name_and_plausible_email() {
    assert!(validate_registration(&form()).is_ok());

    let mut no_name = form();
    no_name.full_name = "  ".to_owned();
    assert!(matches!(validate_registration(&no_name), Err(ChatError::Validation(_))));

    let mut bad_email = form();
    bad_email.email = "dewi".to_owned();
    assert!(matches!(validate_registration(&bad_email), Err(ChatError::Validation(_))));
}

#[tokio::test]
async fn login_with_empty_fields_makes_no_request() {
    // Port 9 (discard) on localhost; a request would fail as Unreachable.
    let config = ClientConfig { api_base_url: "http://127.0.0.1:9/api".to_owned(), ..ClientConfig::default() };
    let client = AuthClient::new(&config).unwrap();
    let err = client.login("  ", "secret").await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
}
