use crate::lang::{Module, Value};

const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub fn module() -> Module {
    let m = Module::new("string", "Common string constants.");
    m.set("ascii_lowercase", Value::from(LOWERCASE));
    m.set("ascii_uppercase", Value::from(UPPERCASE));
    m.set("ascii_letters", Value::from(format!("{}{}", LOWERCASE, UPPERCASE)));
    m.set("digits", Value::from("0123456789"));
    m.set("hexdigits", Value::from("0123456789abcdefABCDEF"));
    m.set("octdigits", Value::from("01234567"));
    m.set("punctuation", Value::from("!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~"));
    m.set("whitespace", Value::from(" \t\n\r\x0b\x0c"));

    m.add_function("capwords", |_, args| {
        args.check("capwords", 1, 2, &["sep"])?;
        let text = args.text(0, "capwords")?;
        let sep = match args.get(1).or_else(|| args.keyword("sep")) {
            Some(Value::Str(s)) => Some(s.to_string()),
            _ => None,
        };
        let capitalize = |word: &str| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        };
        let joined = match sep {
            Some(sep) => text.split(sep.as_str()).map(capitalize).collect::<Vec<String>>().join(&sep),
            None => text.split_whitespace().map(capitalize).collect::<Vec<String>>().join(" "),
        };
        Ok(Value::from(joined))
    });
    m
}
