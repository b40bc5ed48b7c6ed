/// Notification texts
///
/// Plain string renderers for every message the identity core sends.
/// Email bodies that carry links are rendered as minimal HTML; SMS and push
/// texts are plain.

use chrono::{DateTime, Utc};

use crate::models::RoleStatus;

/// Timestamp layout used in user-facing messages
const DISPLAY_FORMAT: &str = "%d/%m/%Y %H:%M:%S UTC";

/// Subject and body of a rendered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
}

impl Rendered {
    fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

pub fn email_change_code(code: &str) -> Rendered {
    Rendered::new(
        "TOQ - Confirmação de Alteração de Email",
        format!("Seu código de validação para alteração de email é: {}", code),
    )
}

pub fn password_change_code(code: &str) -> Rendered {
    Rendered::new(
        "TOQ - Redefinição de Senha",
        format!("Seu código para redefinição de senha é: {}", code),
    )
}

/// SMS body for phone confirmation
pub fn phone_change_code(code: &str) -> String {
    format!("TOQ - Seu código de validação: {}", code)
}

/// Data shown in the account-locked email
#[derive(Debug, Clone)]
pub struct AccountLocked<'a> {
    pub nickname: &'a str,
    pub blocked_at: DateTime<Utc>,
    pub unblock_at: DateTime<Utc>,
    pub failed_attempts: i32,
    pub reset_password_url: &'a str,
}

pub fn account_locked(data: &AccountLocked<'_>) -> Rendered {
    let body = format!(
        "<html><body>\
<p>Olá, {nickname}.</p>\
<p>Detectamos {attempts} tentativas de acesso com senha incorreta e bloqueamos sua conta temporariamente em {blocked_at}.</p>\
<p>O acesso será liberado automaticamente em {unblock_at}.</p>\
<p>Se não foi você, <a href=\"{url}\">redefina sua senha</a>.</p>\
</body></html>",
        nickname = html_escape(data.nickname),
        attempts = data.failed_attempts,
        blocked_at = data.blocked_at.format(DISPLAY_FORMAT),
        unblock_at = data.unblock_at.format(DISPLAY_FORMAT),
        url = html_escape(data.reset_password_url),
    );
    Rendered::new("TOQ - Alerta de Segurança", body)
}

pub fn system_user_welcome(nickname: &str, role_name: &str, reset_password_url: &str) -> Rendered {
    let body = format!(
        "<html><body>\
<p>Olá, {nickname}.</p>\
<p>Sua conta TOQ com o perfil {role} foi criada.</p>\
<p>Para acessar, <a href=\"{url}\">defina sua senha</a>.</p>\
</body></html>",
        nickname = html_escape(nickname),
        role = html_escape(role_name),
        url = html_escape(reset_password_url),
    );
    Rendered::new("Bem-vindo à TOQ", body)
}

/// Push sent to the realtor after an admin decides a manual review
pub fn manual_review_push(outcome: RoleStatus) -> Rendered {
    if outcome == RoleStatus::Active {
        return Rendered::new("Aprovação de Cadastro", "Seu cadastro como corretor foi aprovado.");
    }

    let body = match outcome {
        RoleStatus::RefusedImage => "Seu cadastro foi reprovado por problemas nas imagens enviadas.",
        RoleStatus::RefusedDocument => "Seu cadastro foi reprovado por inconsistência nos documentos.",
        RoleStatus::RefusedData => "Seu cadastro foi reprovado por divergência de dados.",
        _ => "Seu cadastro foi reprovado.",
    };
    Rendered::new("Reprovação de Cadastro", body)
}

pub fn creci_under_review_push() -> Rendered {
    Rendered::new(
        "Documentos Recebidos",
        "Recebemos seus documentos. Seu cadastro está em análise.",
    )
}

pub fn profile_completed_push() -> Rendered {
    Rendered::new("Cadastro Concluído", "Seu cadastro na TOQ está completo.")
}

/// Push to a realtor already on the platform
pub fn invite_push(agency_nickname: &str) -> Rendered {
    Rendered::new(
        "Nova Proposta de Trabalho",
        format!("A imobiliária {} quer trabalhar com você!", agency_nickname),
    )
}

/// SMS to a phone with no account yet
pub fn invite_sms(agency_nickname: &str) -> String {
    format!(
        "A imobiliária {} quer trabalhar com você! Baixe o app TOQ e aceite o convite.",
        agency_nickname
    )
}

pub fn invite_accepted_push(realtor_name: &str) -> Rendered {
    Rendered::new(
        "Convite Aceito - TOQ",
        format!(
            "O corretor {} aceitou seu convite para trabalhar com sua imobiliária!",
            realtor_name
        ),
    )
}

pub fn invite_rejected_push(realtor_name: &str) -> Rendered {
    Rendered::new(
        "Convite Rejeitado - TOQ",
        format!(
            "O corretor {} rejeitou seu convite para trabalhar com sua imobiliária.",
            realtor_name
        ),
    )
}

pub fn realtor_unlinked_push(realtor_name: &str) -> Rendered {
    Rendered::new(
        "Corretor Desvinculado",
        format!("O corretor {} não faz mais parte da sua imobiliária.", realtor_name),
    )
}

pub fn agency_unlinked_push(agency_nickname: &str) -> Rendered {
    Rendered::new(
        "Imobiliária Desvinculada",
        format!("A imobiliária {} encerrou o vínculo com você.", agency_nickname),
    )
}

fn html_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_account_locked_fields() {
        let blocked_at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        let rendered = account_locked(&AccountLocked {
            nickname: "Ana <admin>",
            blocked_at,
            unblock_at: blocked_at + chrono::Duration::minutes(15),
            failed_attempts: 3,
            reset_password_url: "https://app.toq.com.br/reset",
        });

        assert_eq!(rendered.subject, "TOQ - Alerta de Segurança");
        assert!(rendered.body.contains("09/03/2024 14:05:00 UTC"));
        assert!(rendered.body.contains("09/03/2024 14:20:00 UTC"));
        assert!(rendered.body.contains("Ana &lt;admin&gt;"));
        assert!(rendered.body.contains("3 tentativas"));
    }

    #[test]
    fn test_manual_review_texts() {
        assert_eq!(manual_review_push(RoleStatus::Active).subject, "Aprovação de Cadastro");
        let refused = manual_review_push(RoleStatus::RefusedDocument);
        assert_eq!(refused.subject, "Reprovação de Cadastro");
        assert!(refused.body.contains("documentos"));
    }

    #[test]
    fn test_code_messages_carry_code() {
        assert!(email_change_code("K7P2QX").body.ends_with("K7P2QX"));
        assert!(phone_change_code("K7P2QX").ends_with("K7P2QX"));
        assert!(password_change_code("K7P2QX").body.contains("K7P2QX"));
    }
}
