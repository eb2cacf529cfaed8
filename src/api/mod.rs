use rocket::Route;

mod auth;
mod registration;
mod sync;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(registration::routes());
    routes.extend(auth::routes());
    routes.extend(voting::routes());
    routes.extend(sync::routes());
    routes
}

/// Client-side steps shared by the handler tests.
#[cfg(test)]
pub(crate) mod testing {
    use ed25519_dalek::{Signer, SigningKey};
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::serde_json,
    };

    use crate::model::api::{
        auth::{AuthRequest, AuthToken, Challenge, PreAuthRequest},
        registration::VoterRegistration,
        status::{RegisterVoterCode, Reply},
    };

    pub async fn register(client: &Client, registration: &VoterRegistration) -> RegisterVoterCode {
        let response = client
            .post("/registration/voters")
            .header(ContentType::JSON)
            .body(serde_json::to_string(registration).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let reply: Reply<RegisterVoterCode> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        reply.code
    }

    pub async fn request_challenge(client: &Client, name: &str) -> String {
        let request = PreAuthRequest {
            name: name.to_string(),
        };
        let response = client
            .post("/voting/preauth")
            .header(ContentType::JSON)
            .body(serde_json::to_string(&request).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let challenge: Challenge =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        challenge.value
    }

    pub async fn authenticate(client: &Client, name: &str, key: &SigningKey) -> AuthToken {
        let challenge = request_challenge(client, name).await;
        let request = AuthRequest {
            name: name.to_string(),
            response: key.sign(challenge.as_bytes()).to_bytes().to_vec(),
        };
        let response = client
            .post("/voting/auth")
            .header(ContentType::JSON)
            .body(serde_json::to_string(&request).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
    }

    /// Register `alice` and authenticate as that voter.
    pub async fn login_example_voter(client: &Client) -> AuthToken {
        let registration = VoterRegistration::example();
        assert_eq!(register(client, &registration).await, RegisterVoterCode::Success);
        authenticate(client, &registration.name, &VoterRegistration::example_key()).await
    }
}
