use super::handlers::{admins, health, me, partners, rbac, users};
use utoipa::openapi::{
    security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Contact, InfoBuilder, License, OpenApiBuilder, Tag,
};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Router that both serves the endpoints and drives the `OpenAPI` document.
///
/// Handlers sharing a path go into one `routes!` call.
pub(crate) fn api_router() -> OpenApiRouter {
    OpenApiRouter::with_openapi(base_openapi())
        .routes(routes!(health::health))
        .routes(routes!(me::me))
        .routes(routes!(users::signup))
        .routes(routes!(users::verify_otp))
        .routes(routes!(users::resend_otp))
        .routes(routes!(users::signin))
        .routes(routes!(users::refresh))
        .routes(routes!(users::signout))
        .routes(routes!(partners::signup))
        .routes(routes!(partners::verify_otp))
        .routes(routes!(partners::resend_otp))
        .routes(routes!(partners::signin))
        .routes(routes!(partners::refresh))
        .routes(routes!(partners::signout))
        .routes(routes!(admins::signin))
        .routes(routes!(admins::refresh))
        .routes(routes!(admins::signout))
        .routes(routes!(rbac::list_roles, rbac::create_role))
        .routes(routes!(rbac::get_role, rbac::update_role, rbac::delete_role))
        .routes(routes!(rbac::role_permissions))
        .routes(routes!(rbac::assign_role))
        .routes(routes!(rbac::revoke_role))
        .routes(routes!(rbac::admin_roles))
        .routes(routes!(rbac::list_permissions, rbac::create_permission))
        .routes(routes!(
            rbac::get_permission,
            rbac::update_permission,
            rbac::delete_permission
        ))
        .routes(routes!(rbac::assign_permission))
        .routes(routes!(rbac::revoke_permission))
        .routes(routes!(rbac::check_permission))
}

/// Cargo metadata plus the tags and security scheme every route refers to.
fn base_openapi() -> utoipa::openapi::OpenApi {
    let mut openapi = cargo_openapi();
    openapi.tags = Some(vec![
        tag("health", "Service and database status"),
        tag("me", "The authenticated caller"),
        tag("users", "End-user signup, verification and sessions"),
        tag("partners", "Partner signup, verification and sessions"),
        tag("admins", "Administrator sessions"),
        tag("rbac", "Administrator roles and permissions"),
    ]);
    openapi
        .components
        .get_or_insert_with(Default::default)
        .add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    openapi
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated, "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next().map(str::trim)?;
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    non_empty(value)
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, email)) => (non_empty(name), non_empty(email.trim_end_matches('>'))),
        None => (non_empty(author), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));

        let contact = doc.info.contact.unwrap_or_default();
        assert_eq!(contact.name.as_deref(), Some("Team CarHub"));
        assert_eq!(contact.email.as_deref(), Some("team@carhub.dev"));

        let license = doc.info.license.map(|license| license.name);
        assert_eq!(license.as_deref(), Some("BSD-3-Clause"));
    }

    #[test]
    fn openapi_documents_every_surface() {
        let doc = openapi();
        for path in [
            "/health",
            "/v1/me",
            "/v1/users/signup",
            "/v1/partners/verify-otp",
            "/v1/admins/signin",
            "/v1/admin/roles/{role_id}",
            "/v1/admin/admins/{admin_id}/roles",
            "/v1/admin/permissions/check",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let tags = doc.tags.clone().unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "rbac"));
        let schemes = doc.components.map(|c| c.security_schemes).unwrap_or_default();
        assert!(schemes.contains_key("bearer"));
    }

    #[test]
    fn author_parsing() {
        assert_eq!(
            parse_author("Jane <jane@x.com>"),
            (Some("Jane"), Some("jane@x.com"))
        );
        assert_eq!(parse_author("Jane"), (Some("Jane"), None));
        assert_eq!(parse_author(" <ops@x.com>"), (None, Some("ops@x.com")));
    }
}
