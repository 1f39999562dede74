/// Trunca uma string respeitando os limites de caracteres UTF-8
///
/// Retorna no máximo `max_bytes` bytes, recuando até o último limite válido
/// de caractere em vez de causar panic.
pub fn truncate_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}

/// Prévia de um token para logs e saída do CLI
///
/// Nunca expõe o token completo: mostra os primeiros 12 bytes e o tamanho.
pub fn token_preview(token: &str) -> String {
    const PREVIEW_BYTES: usize = 12;

    if token.is_empty() {
        return "<vazio>".to_string();
    }

    if token.len() <= PREVIEW_BYTES {
        return format!("{}... ({} chars)", truncate_safe(token, 4), token.chars().count());
    }

    format!("{}... ({} chars)", truncate_safe(token, PREVIEW_BYTES), token.chars().count())
}
