//! Built-in flows

use super::{Content, GraphError, OptionItem, OptionsSource, Step, StepGraph, Validator};
use std::collections::BTreeMap;

/// Field that classifies the visitor; carried on analytics events once known
pub const USER_TYPE_FIELD: &str = "userType";

/// Look up a built-in flow by name
pub fn by_name(name: &str) -> Option<Result<StepGraph, GraphError>> {
    match name {
        "lead" => Some(lead_flow()),
        "contact" => Some(contact_flow()),
        _ => None,
    }
}

/// Full agency interview: businesses and creators take different branches
/// and merge again for contact details.
pub fn lead_flow() -> Result<StepGraph, GraphError> {
    let steps = vec![
        Step::message(
            "start",
            "Olá! 👋 Sou o assistente da agência. Vou fazer algumas perguntas rápidas para entender como podemos ajudar.",
        )
        .then("name"),
        Step::input("name", "name", "Para começar, qual é o seu nome?")
            .validate(
                Validator::MinLength { min: 3 },
                "Por favor, digite seu nome (pelo menos 3 letras).",
            )
            .then("greeting"),
        Step::message("greeting", Content::template("Prazer, {name|first}! 😊")).then("type"),
        Step::options(
            "type",
            USER_TYPE_FIELD,
            "Você representa uma empresa ou é criador de conteúdo?",
            vec![
                OptionItem::new("Sou uma empresa", "empresa"),
                OptionItem::new("Sou criador de conteúdo", "criador"),
            ],
        )
        .branch([("empresa", "businessName"), ("criador", "creatorNiche")]),
        // Business branch
        Step::input("businessName", "businessName", "Qual é o nome da sua empresa?")
            .validate(
                Validator::MinLength { min: 2 },
                "Digite o nome da empresa (pelo menos 2 letras).",
            )
            .then("businessSegment"),
        Step::options(
            "businessSegment",
            "businessSegment",
            Content::template("Em qual segmento a {businessName} atua?"),
            vec![
                OptionItem::new("Varejo / E-commerce", "varejo"),
                OptionItem::new("Alimentação", "alimentacao"),
                OptionItem::new("Serviços", "servicos"),
                OptionItem::new("Tecnologia", "tecnologia"),
                OptionItem::new("Saúde e bem-estar", "saude"),
                OptionItem::new("Outro", "outro"),
            ],
        )
        .then("interest"),
        // Creator branch
        Step::options(
            "creatorNiche",
            "creatorNiche",
            "Qual é o seu nicho principal?",
            vec![
                OptionItem::new("Moda", "moda"),
                OptionItem::new("Beleza", "beleza"),
                OptionItem::new("Fitness", "fitness"),
                OptionItem::new("Gastronomia", "gastronomia"),
                OptionItem::new("Tecnologia", "tecnologia"),
                OptionItem::new("Lifestyle", "lifestyle"),
                OptionItem::new("Outro", "outro"),
            ],
        )
        .then("creatorFollowers"),
        Step::options(
            "creatorFollowers",
            "creatorFollowers",
            "Quantos seguidores você tem na sua principal rede?",
            vec![
                OptionItem::new("Até 10 mil", "ate_10k"),
                OptionItem::new("10 mil a 100 mil", "10k_100k"),
                OptionItem::new("100 mil a 1 milhão", "100k_1m"),
                OptionItem::new("Mais de 1 milhão", "1m_mais"),
            ],
        )
        .then("creatorProfile"),
        Step::input(
            "creatorProfile",
            "creatorProfile",
            "Qual é o link do seu perfil principal?",
        )
        .validate(
            Validator::Url,
            "Esse link não parece válido. Ex.: instagram.com/seuperfil",
        )
        .then("interest"),
        // Shared tail
        Step::options("interest", "interest", "Como podemos te ajudar?", vec![])
            .with_options(interest_options())
            .then("email"),
        Step::input(
            "email",
            "email",
            Content::template("Ótimo, {name|first}! Qual é o seu melhor e-mail?"),
        )
        .validate(
            Validator::Email,
            "Hmm, esse e-mail não parece válido. Pode conferir?",
        )
        .then("phone"),
        Step::input("phone", "phone", "E o seu WhatsApp com DDD?")
            .validate(
                Validator::Phone,
                "Digite um telefone válido com DDD, ex.: (11) 98765-4321.",
            )
            .then("final"),
        Step::message(
            "final",
            Content::template(
                "Obrigado, {name|first}! Recebemos suas informações e nossa equipe vai entrar em contato em breve. 🚀",
            ),
        ),
    ];

    StepGraph::new("start", steps)
}

fn interest_options() -> OptionsSource {
    let mut table = BTreeMap::new();
    table.insert(
        "empresa".to_string(),
        vec![
            OptionItem::new("Campanha com influenciadores", "campanha"),
            OptionItem::new("Gestão de redes sociais", "social_media"),
            OptionItem::new("Consultoria de marketing", "consultoria"),
        ],
    );
    table.insert(
        "criador".to_string(),
        vec![
            OptionItem::new("Parcerias com marcas", "parcerias"),
            OptionItem::new("Agenciamento de carreira", "agenciamento"),
            OptionItem::new("Crescer meu perfil", "crescimento"),
        ],
    );
    OptionsSource::ByField {
        field: USER_TYPE_FIELD.to_string(),
        table,
        fallback: vec![OptionItem::new("Quero conversar com a equipe", "contato")],
    }
}

/// Short contact form: name, e-mail and a free message
pub fn contact_flow() -> Result<StepGraph, GraphError> {
    let steps = vec![
        Step::message("start", "Oi! Deixe seu contato que a gente te responde.").then("name"),
        Step::input("name", "name", "Qual é o seu nome?")
            .validate(
                Validator::MinLength { min: 3 },
                "Por favor, digite seu nome (pelo menos 3 letras).",
            )
            .then("email"),
        Step::input("email", "email", "Qual é o seu e-mail?")
            .validate(Validator::Email, "Esse e-mail não parece válido.")
            .then("message"),
        Step::input(
            "message",
            "message",
            Content::template("Como podemos ajudar, {name|first}?"),
        )
        .validate(Validator::NonEmpty, "Escreva uma mensagem curta, por favor.")
        .then("final"),
        Step::message("final", "Mensagem recebida! Obrigado pelo contato."),
    ];

    StepGraph::new("start", steps)
}
