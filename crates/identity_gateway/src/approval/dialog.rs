use axum::response::Html;

use super::ConsentState;
use crate::config::ServerMetadata;
use crate::provider::ClientRecord;

/// Render the consent page for `client`
///
/// The form posts back to `/authorize` with `state` as a hidden field.
pub fn render_approval_dialog(
    client: &ClientRecord,
    server: &ServerMetadata,
    state: &ConsentState,
) -> Html<String> {
    let client_name = escape_html(client.display_name());
    let server_name = escape_html(&server.name);
    let server_description = escape_html(&server.description);
    let encoded_state = escape_html(&state.encode());

    let logo = server
        .logo
        .as_deref()
        .map(|logo| format!(r#"<img class="logo" src="{}" alt="{} logo">"#, escape_html(logo), server_name))
        .unwrap_or_default();

    let redirect_uris = client
        .redirect_uris
        .iter()
        .map(|uri| format!("<li>{}</li>", escape_html(uri)))
        .collect::<String>();

    let optional_row = |label: &str, value: Option<&str>| {
        value
            .map(|v| format!("<dt>{}</dt><dd>{}</dd>", label, escape_html(v)))
            .unwrap_or_default()
    };
    let details = [
        optional_row("Website", client.client_uri.as_deref()),
        optional_row("Privacy Policy", client.policy_uri.as_deref()),
        optional_row("Terms of Service", client.tos_uri.as_deref()),
    ]
    .concat();

    Html(format!(r#"
<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{client_name} | Authorization Request</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, Cantarell, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: #f7fafc;
        }}
        .container {{
            background: white;
            padding: 2.5rem;
            border-radius: 1rem;
            box-shadow: 0 10px 30px rgba(0,0,0,0.1);
            max-width: 520px;
        }}
        .logo {{
            width: 48px;
            height: 48px;
            border-radius: 0.5rem;
        }}
        h1 {{
            color: #2d3748;
            font-size: 1.4rem;
        }}
        dl {{
            background: #edf2f7;
            padding: 1rem;
            border-radius: 0.5rem;
        }}
        dt {{
            font-weight: bold;
        }}
        .actions {{
            display: flex;
            gap: 1rem;
            justify-content: flex-end;
            margin-top: 2rem;
        }}
        button {{
            border: none;
            padding: 0.75rem 2rem;
            border-radius: 0.5rem;
            font-size: 1rem;
            cursor: pointer;
        }}
        .approve {{
            background: #667eea;
            color: white;
        }}
        .cancel {{
            background: #e2e8f0;
        }}
    </style>
</head>
<body>
    <div class="container">
        {logo}
        <h1>{server_name}</h1>
        <p>{server_description}</p>
        <p><strong>{client_name}</strong> is requesting access to your account.</p>
        <dl>
            <dt>Application</dt><dd>{client_name}</dd>
            {details}
            <dt>Redirect URIs</dt><dd><ul>{redirect_uris}</ul></dd>
        </dl>
        <p>If you approve, you will be redirected to GitHub to sign in.</p>
        <form method="post" action="/authorize">
            <input type="hidden" name="state" value="{encoded_state}">
            <div class="actions">
                <button type="button" class="cancel" onclick="window.history.back()">Cancel</button>
                <button type="submit" class="approve">Approve</button>
            </div>
        </form>
    </div>
</body>
</html>
"#))
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
