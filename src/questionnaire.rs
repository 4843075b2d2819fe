//! Terminal side of the closing questionnaire. The window is gone by the time
//! this runs, so the answers are read line by line from stdin.

use rtstudy_core::QuestionnaireAnswers;
use std::io::{self, BufRead, Write};
use std::str::FromStr;

pub fn collect_answers<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
) -> io::Result<QuestionnaireAnswers> {
    writeln!(out)?;
    writeln!(out, "Fragebogen (leere Eingabe überspringt eine Frage)")?;

    let age = ask_number(input, out, "Alter", |a: &u32| (1..=120).contains(a))?;
    let gender = ask(input, out, "Geschlecht")?.unwrap_or_default();
    let occupation = ask(input, out, "Beruf / Studienfach")?.unwrap_or_default();
    let used_hand = ask(input, out, "Benutzte Hand (links/rechts)")?.unwrap_or_default();
    let keyboard_type = ask(input, out, "Tastaturlayout (z. B. QWERTZ)")?.unwrap_or_default();
    let keyboard_usage = ask_number(
        input,
        out,
        "Wie oft nutzt du eine Tastatur? (1 = selten, 5 = täglich)",
        |u: &u8| (1..=5).contains(u),
    )?;
    let has_eye_impairment = ask(input, out, "Farbsehschwäche? (j/n)")?
        .is_some_and(|s| matches!(s.to_lowercase().as_str(), "j" | "ja" | "y" | "yes"));
    let eye_impairment = if has_eye_impairment {
        ask(input, out, "Welche?")?.unwrap_or_default()
    } else {
        String::new()
    };

    Ok(QuestionnaireAnswers {
        age,
        gender,
        occupation,
        used_hand,
        keyboard_type,
        keyboard_usage,
        has_eye_impairment,
        eye_impairment,
    })
}

/// `None` on an empty line or end of input.
fn ask<R: BufRead, W: Write>(input: &mut R, out: &mut W, prompt: &str) -> io::Result<Option<String>> {
    write!(out, "{prompt}: ")?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let answer = line.trim();
    Ok((!answer.is_empty()).then(|| answer.to_owned()))
}

/// Re-asks until the answer parses and passes `valid`, or is skipped.
fn ask_number<T, R, W>(
    input: &mut R,
    out: &mut W,
    prompt: &str,
    valid: impl Fn(&T) -> bool,
) -> io::Result<Option<T>>
where
    T: FromStr,
    R: BufRead,
    W: Write,
{
    loop {
        let Some(answer) = ask(input, out, prompt)? else {
            return Ok(None);
        };
        match answer.parse::<T>() {
            Ok(v) if valid(&v) => return Ok(Some(v)),
            _ => writeln!(out, "Ungültige Eingabe: {answer}")?,
        }
    }
}
